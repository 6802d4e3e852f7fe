use crate::runtime::pool::Job;
use crate::runtime::scheduler::ThreadClass;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Jobs run per scheduling turn before the strand gives its worker back.
const STRAND_BATCH: usize = 64;

/// Something that accepts work.
pub trait Executor: Send + Sync {
    fn post_job(&self, job: Job);

    fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.post_job(Box::new(f));
    }
}

/// Serializing view over a worker pool.
///
/// Jobs posted through one strand run one at a time, in submission order,
/// never concurrently with each other. Jobs of different strands on the same
/// pool interleave freely. A strand is bound to the pool generation it was
/// created from; after `AsyncRuntime::stop()` its jobs are dropped.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

struct StrandInner {
    class: ThreadClass,
    handle: Handle,
    queue: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    jobs: VecDeque<Job>,
    scheduled: bool,
}

impl Strand {
    pub(crate) fn new(class: ThreadClass, handle: Handle) -> Self {
        Self {
            inner: Arc::new(StrandInner {
                class,
                handle,
                queue: Mutex::new(Pending::default()),
            }),
        }
    }

    /// Pool class this strand runs on.
    pub fn class(&self) -> ThreadClass {
        self.inner.class
    }

    /// Jobs accepted but not started yet.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().jobs.len()
    }
}

impl Executor for Strand {
    fn post_job(&self, job: Job) {
        {
            let mut q = self.inner.queue.lock();
            q.jobs.push_back(job);
            if q.scheduled {
                return;
            }
            q.scheduled = true;
        }
        StrandInner::schedule(self.inner.clone());
    }
}

impl StrandInner {
    fn schedule(this: Arc<Self>) {
        let handle = this.handle.clone();
        handle.spawn(async move { this.run_batch() });
    }

    fn run_batch(self: Arc<Self>) {
        for _ in 0..STRAND_BATCH {
            let job = {
                let mut q = self.queue.lock();
                match q.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        q.scheduled = false;
                        return;
                    }
                }
            };
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("[Strand] {} job panicked, continuing with the next one", self.class);
            }
        }

        let more = {
            let mut q = self.queue.lock();
            q.scheduled = !q.jobs.is_empty();
            q.scheduled
        };
        if more {
            Self::schedule(self);
        }
    }
}
