use crate::runtime::scheduler::{ThreadClass, ThreadScheduler};
use parking_lot::Mutex;
use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tokio::runtime::{Builder, Handle, Runtime};

/// Unit of work accepted by pools and strands.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

static POOL_IDS: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Id of the pool the current thread works for, 0 outside any pool.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Fixed-size set of OS threads draining one run-loop.
pub(crate) struct WorkerPool {
    id: usize,
    class: ThreadClass,
    threads: usize,
    rt: Runtime,
}

impl WorkerPool {
    /// Spawn `threads` workers. Each one reports `(class, index)` to the
    /// scheduler hook before it starts taking work.
    pub(crate) fn start(
        class: ThreadClass,
        threads: usize,
        scheduler: Option<Arc<dyn ThreadScheduler>>,
    ) -> io::Result<Self> {
        let id = POOL_IDS.fetch_add(1, Ordering::Relaxed);
        let name_seq = Arc::new(AtomicUsize::new(0));
        let start_seq = Arc::new(AtomicUsize::new(0));

        let rt = Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_time()
            .thread_name_fn(move || {
                format!("duplex-{}-{}", class, name_seq.fetch_add(1, Ordering::Relaxed))
            })
            .on_thread_start(move || {
                CURRENT_POOL.with(|p| p.set(id));
                let index = start_seq.fetch_add(1, Ordering::Relaxed);
                if let Some(s) = scheduler.as_ref() {
                    s.on_thread_start(class, index);
                }
            })
            .build()?;

        tracing::debug!("[WorkerPool] {class} pool started with {threads} threads");
        Ok(Self {
            id,
            class,
            threads,
            rt,
        })
    }

    #[inline]
    pub(crate) fn post(&self, job: Job) {
        self.rt.spawn(async move { job() });
    }

    #[inline]
    pub(crate) fn handle(&self) -> Handle {
        self.rt.handle().clone()
    }

    #[inline]
    pub(crate) fn threads(&self) -> usize {
        self.threads
    }

    /// Drop queued work and join the workers once their running jobs return.
    ///
    /// A worker of this pool cannot join itself, so from there the pool is
    /// detached instead. Inside any other tokio context the join happens on a
    /// helper thread, because tokio refuses to block an async worker.
    pub(crate) fn shutdown(self) {
        let Self { id, class, rt, .. } = self;

        if CURRENT_POOL.with(|p| p.get()) == id {
            tracing::warn!("[WorkerPool] {class} pool stopped from its own worker, detaching");
            rt.shutdown_background();
            return;
        }

        if Handle::try_current().is_ok() {
            let slot = Arc::new(Mutex::new(Some(rt)));
            let joiner = slot.clone();
            match thread::Builder::new()
                .name(format!("duplex-{class}-join"))
                .spawn(move || drop(joiner.lock().take()))
            {
                Ok(h) => {
                    if h.join().is_err() {
                        tracing::error!("[WorkerPool] {class} pool panicked while joining");
                    }
                }
                Err(e) => {
                    tracing::error!("[WorkerPool] {class} join thread failed: {e}, detaching");
                    if let Some(rt) = slot.lock().take() {
                        rt.shutdown_background();
                    }
                }
            }
        } else {
            drop(rt);
        }
        tracing::debug!("[WorkerPool] {class} pool stopped");
    }
}
