use crate::config::ControlConfig;
use crate::error::{TransportError, TransportFailReason, TransportResult};
use crate::transport::{Context, Endpoint, Publisher, Subscriber};
use crate::utils::CancelToken;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_THROTTLE: Duration = Duration::from_secs(5);

/// Control-plane message handler. Runs on the endpoint's receive thread and
/// must return promptly: every other callback of that endpoint waits for it.
pub type ControlCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Endpoint-addressed pub/sub for small string messages.
///
/// One publishing socket per endpoint, bound on the first `publish`; one
/// receive thread per endpoint, started on the first `subscribe`. Delivery is
/// best-effort: a subscriber only sees messages sent after its connection is
/// established (slow joiner), so callers that need a first message must
/// publish until it is acknowledged.
pub struct ControlBus {
    cfg: ControlConfig,
    registry: Mutex<Registry>,
}

struct Registry {
    context: Option<Context>,
    stop: CancelToken,
    publishers: AHashMap<String, Arc<Mutex<PubSlot>>>,
    workers: AHashMap<String, ReceiveWorker>,
    spawned: usize,
}

impl Registry {
    fn new() -> Self {
        Self {
            context: None,
            stop: CancelToken::new_root(),
            publishers: AHashMap::new(),
            workers: AHashMap::new(),
            spawned: 0,
        }
    }

    fn context(&mut self, cfg: &ControlConfig) -> Context {
        self.context.get_or_insert_with(|| Context::new(cfg)).clone()
    }
}

enum PubSlot {
    Unbound,
    Bound(Box<dyn Publisher>),
    Closed,
}

struct ReceiveWorker {
    fanout: Arc<Mutex<Vec<ControlCallback>>>,
    join: JoinHandle<()>,
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new(ControlConfig::default())
    }
}

impl ControlBus {
    pub fn new(cfg: ControlConfig) -> Self {
        Self {
            cfg,
            registry: Mutex::new(Registry::new()),
        }
    }

    /// Send `message` to every current subscriber of `endpoint`, binding the
    /// endpoint first if this is its first publish.
    pub fn publish(&self, endpoint: &str, message: &str) -> TransportResult<()> {
        Endpoint::parse(endpoint)?;

        let (slot, ctx) = {
            let mut reg = self.registry.lock();
            let ctx = reg.context(&self.cfg);
            let slot = reg
                .publishers
                .entry(endpoint.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(PubSlot::Unbound)))
                .clone();
            (slot, ctx)
        };

        let mut slot = slot.lock();
        if matches!(*slot, PubSlot::Unbound) {
            let publisher = ctx.bind(endpoint).map_err(closed_if_terminated)?;
            tracing::info!("[ControlBus] publisher bound to {endpoint}");
            *slot = PubSlot::Bound(publisher);
        }
        match &mut *slot {
            PubSlot::Bound(publisher) => publisher.send(message.as_bytes()),
            _ => Err(TransportError::closed(endpoint)),
        }
    }

    /// Register `callback` for `endpoint`. The first subscription connects and
    /// starts the receive thread; connect errors are returned here.
    pub fn subscribe<F>(&self, endpoint: &str, callback: F) -> TransportResult<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Endpoint::parse(endpoint)?;
        let callback: ControlCallback = Arc::new(callback);

        let mut reg = self.registry.lock();
        if let Some(worker) = reg.workers.get(endpoint) {
            worker.fanout.lock().push(callback);
            return Ok(());
        }

        let ctx = reg.context(&self.cfg);
        let subscriber = ctx.connect(endpoint).map_err(closed_if_terminated)?;
        let fanout = Arc::new(Mutex::new(vec![callback]));
        let stop = reg.stop.new_child();
        let poll = self.cfg.poll_timeout();

        let name = format!("duplex-ctl-{}", reg.spawned);
        let join = {
            let fanout = fanout.clone();
            thread::Builder::new()
                .name(name)
                .spawn(move || receive_loop(subscriber, fanout, stop, poll))
                .map_err(|e| TransportError::with_source(TransportFailReason::Connect, endpoint, e))?
        };
        reg.spawned += 1;
        reg.workers
            .insert(endpoint.to_owned(), ReceiveWorker { fanout, join });
        tracing::info!("[ControlBus] receive worker started for {endpoint}");
        Ok(())
    }

    /// Stop every receive thread, join them with no lock held, then close all
    /// sockets and release the transport context. Safe to call repeatedly and
    /// from inside a callback; the bus can be used again afterwards.
    pub fn shutdown(&self) {
        let (workers, publishers, context) = {
            let mut reg = self.registry.lock();
            reg.stop.cancel();
            reg.stop = CancelToken::new_root();
            (
                std::mem::take(&mut reg.workers),
                std::mem::take(&mut reg.publishers),
                reg.context.take(),
            )
        };
        if workers.is_empty() && publishers.is_empty() && context.is_none() {
            return;
        }

        let me = thread::current().id();
        for (endpoint, worker) in workers {
            worker.fanout.lock().clear();
            if worker.join.thread().id() == me {
                tracing::debug!("[ControlBus] shutdown from {endpoint} callback, detaching its worker");
                continue;
            }
            if worker.join.join().is_err() {
                tracing::error!("[ControlBus] receive worker for {endpoint} panicked");
            }
        }

        for (_, slot) in publishers {
            let mut slot = slot.lock();
            if let PubSlot::Bound(publisher) = &mut *slot {
                publisher.close();
            }
            *slot = PubSlot::Closed;
        }

        if let Some(ctx) = context {
            ctx.terminate();
        }
        tracing::info!("[ControlBus] shut down");
    }

    /// Callbacks registered on `endpoint`.
    pub fn callback_count(&self, endpoint: &str) -> usize {
        self.registry
            .lock()
            .workers
            .get(endpoint)
            .map_or(0, |w| w.fanout.lock().len())
    }

    pub fn is_bound(&self, endpoint: &str) -> bool {
        let slot = self.registry.lock().publishers.get(endpoint).cloned();
        slot.is_some_and(|s| matches!(*s.lock(), PubSlot::Bound(_)))
    }

    /// Receive threads currently owned by the bus.
    pub fn worker_count(&self) -> usize {
        self.registry.lock().workers.len()
    }
}

impl Drop for ControlBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A context terminated under a racing call means the bus was shut down.
fn closed_if_terminated(e: TransportError) -> TransportError {
    if e.reason() == TransportFailReason::Context {
        TransportError::closed(e.endpoint)
    } else {
        e
    }
}

fn receive_loop(
    mut subscriber: Box<dyn Subscriber>,
    fanout: Arc<Mutex<Vec<ControlCallback>>>,
    stop: CancelToken,
    poll: Duration,
) {
    let endpoint = subscriber.endpoint().to_owned();
    tracing::debug!("[ControlBus] receiving on {endpoint}");

    while !stop.is_cancelled() {
        match subscriber.recv(poll) {
            Ok(Some(frame)) => {
                let Ok(message) = std::str::from_utf8(&frame) else {
                    crate::warn_throttled!(
                        LOG_THROTTLE,
                        "[ControlBus] dropping non utf-8 message on {endpoint}"
                    );
                    continue;
                };
                let callbacks = fanout.lock().clone();
                for callback in callbacks.iter() {
                    if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                        crate::error_throttled!(
                            LOG_THROTTLE,
                            "[ControlBus] callback on {endpoint} panicked"
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                crate::warn_throttled!(LOG_THROTTLE, "[ControlBus] receive on {endpoint} failed: {e}");
                stop.sleep_cancellable(poll);
            }
        }
    }

    subscriber.close();
    tracing::debug!("[ControlBus] receive worker for {endpoint} exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    fn fast_bus() -> ControlBus {
        ControlBus::new(ControlConfig {
            poll_timeout_ms: 10,
            ..ControlConfig::default()
        })
    }

    #[test]
    fn inproc_subscribe_before_bind_is_refused() {
        let bus = fast_bus();
        let err = bus.subscribe("inproc://early", |_| {}).unwrap_err();
        assert_eq!(err.reason(), TransportFailReason::ConnectionRefused);
        assert_eq!(bus.worker_count(), 0);
    }

    #[test]
    fn bad_endpoint_is_reported_without_side_effects() {
        let bus = fast_bus();
        let err = bus.publish("udp://x:1", "hi").unwrap_err();
        assert_eq!(err.reason(), TransportFailReason::Unsupported);
        assert!(!bus.is_bound("udp://x:1"));
    }

    #[test]
    fn one_worker_per_endpoint() {
        let bus = fast_bus();
        bus.publish("inproc://w", "warmup").unwrap();
        bus.subscribe("inproc://w", |_| {}).unwrap();
        bus.subscribe("inproc://w", |_| {}).unwrap();
        bus.subscribe("inproc://w", |_| {}).unwrap();
        assert_eq!(bus.worker_count(), 1);
        assert_eq!(bus.callback_count("inproc://w"), 3);
    }

    #[test]
    fn panicking_callback_does_not_stop_delivery() {
        let bus = fast_bus();
        bus.publish("inproc://p", "warmup").unwrap();
        let (tx, rx) = unbounded();
        bus.subscribe("inproc://p", |_| panic!("bad handler")).unwrap();
        bus.subscribe("inproc://p", move |m| tx.send(m.to_owned()).unwrap())
            .unwrap();

        bus.publish("inproc://p", "first").unwrap();
        bus.publish("inproc://p", "second").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "second");
    }

    #[test]
    fn shutdown_is_idempotent_and_bus_is_reusable() {
        let bus = fast_bus();
        bus.publish("inproc://r", "x").unwrap();
        bus.subscribe("inproc://r", |_| {}).unwrap();
        bus.shutdown();
        bus.shutdown();
        assert_eq!(bus.worker_count(), 0);
        assert!(!bus.is_bound("inproc://r"));

        bus.publish("inproc://r", "again").unwrap();
        assert!(bus.is_bound("inproc://r"));
    }
}
