use crate::error::BusError;
use crate::io::{Discipline, StreamQueue, make_queue};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Subscriber side of a data-plane topic.
pub type QueueHandle<T> = Arc<dyn StreamQueue<Arc<T>>>;

/// Fan-out list of one topic, erased so topics of different payload types
/// share one registry.
trait ErasedTopic: Send + Sync {
    fn subscriber_count(&self) -> usize;
    fn detach_all(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct Topic<T: Send + Sync> {
    queues: Mutex<Vec<QueueHandle<T>>>,
}

impl<T: Send + Sync> Default for Topic<T> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
        }
    }
}

/// A queue whose only owner is the topic has no subscriber left to read it.
#[inline]
fn is_held<T: Send + Sync>(queue: &QueueHandle<T>) -> bool {
    Arc::strong_count(queue) > 1
}

impl<T: Send + Sync + 'static> ErasedTopic for Topic<T> {
    fn subscriber_count(&self) -> usize {
        self.queues.lock().iter().filter(|q| is_held(q)).count()
    }

    fn detach_all(&self) {
        self.queues.lock().clear();
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Topic-addressed broadcast of shared payloads.
///
/// Every `subscribe_stream` call gets its own queue; `publish_stream` pushes
/// the same `Arc<T>` into each of them. The payload is never cloned, so all
/// subscribers observe the same value: treat payloads as immutable once
/// published, or guard interior mutability yourself.
#[derive(Default)]
pub struct DataBus {
    topics: Mutex<AHashMap<String, Arc<dyn ErasedTopic>>>,
}

impl DataBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new queue to `topic`, creating the topic on first use. The
    /// first subscriber fixes the payload type of the topic.
    pub fn subscribe_stream<T>(
        &self,
        topic: &str,
        discipline: Discipline,
    ) -> Result<QueueHandle<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        let entry = self
            .topics
            .lock()
            .entry(topic.to_owned())
            .or_insert_with(|| {
                tracing::debug!("[DataBus] topic {topic} created");
                Arc::new(Topic::<T>::default()) as Arc<dyn ErasedTopic>
            })
            .clone();

        let typed = entry
            .into_any()
            .downcast::<Topic<T>>()
            .map_err(|_| BusError::TypeMismatch {
                topic: topic.to_owned(),
            })?;

        let queue = make_queue::<Arc<T>>(discipline);
        typed.queues.lock().push(queue.clone());
        Ok(queue)
    }

    /// Push `payload` to every subscriber of `topic` in registration order.
    /// Returns the number of queues reached; an unknown topic is a no-op.
    /// Queues whose handles were all dropped are detached here.
    pub fn publish_stream<T>(&self, topic: &str, payload: Arc<T>) -> usize
    where
        T: Send + Sync + 'static,
    {
        let Some(entry) = self.topics.lock().get(topic).cloned() else {
            return 0;
        };
        let Ok(typed) = entry.into_any().downcast::<Topic<T>>() else {
            tracing::warn!(
                "[DataBus] publish on {topic} with payload {} ignored: topic has another type",
                std::any::type_name::<T>()
            );
            return 0;
        };

        let mut queues = typed.queues.lock();
        queues.retain(|queue| {
            if !is_held(queue) {
                tracing::debug!("[DataBus] subscriber of {topic} dropped, queue detached");
                return false;
            }
            queue.push(payload.clone());
            true
        });
        queues.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let entry = self.topics.lock().get(topic).cloned();
        entry.map_or(0, |t| t.subscriber_count())
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Forget every topic. Existing handles stay usable but get nothing new.
    pub fn shutdown(&self) {
        let topics = std::mem::take(&mut *self.topics.lock());
        if topics.is_empty() {
            return;
        }
        for topic in topics.values() {
            topic.detach_all();
        }
        tracing::info!("[DataBus] shut down, {} topics released", topics.len());
    }
}
