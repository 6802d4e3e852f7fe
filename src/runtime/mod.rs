pub mod pool;
pub mod scheduler;
pub mod strand;
pub mod timer;

pub use pool::Job;
pub use scheduler::{CorePinScheduler, ThreadClass, ThreadPolicy, ThreadScheduler};
pub use strand::{Executor, Strand};
pub use timer::Timer;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::runtime::pool::WorkerPool;
use crate::utils::CancelToken;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const ERR_INIT_FIRST: &str = "AsyncRuntime::init() must be called before creating runtime objects";

/// Two worker pools (latency-sensitive I/O, throughput CPU) plus any number of
/// dedicated critical loops, all sharing one stop signal.
///
/// `init` and `stop` may be called repeatedly and from any thread; each
/// `init` after a `stop` starts a fresh generation of threads.
pub struct AsyncRuntime {
    starting: Mutex<()>,
    state: RwLock<Option<Running>>,
}

struct Running {
    io: WorkerPool,
    cpu: WorkerPool,
    critical: Vec<JoinHandle<()>>,
    stop: CancelToken,
    scheduler: Option<Arc<dyn ThreadScheduler>>,
}

impl Default for AsyncRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRuntime {
    pub fn new() -> Self {
        Self {
            starting: Mutex::new(()),
            state: RwLock::new(None),
        }
    }

    /// Start both pools. No-op while already running.
    ///
    /// `io_threads == 0` is bumped to one, `cpu_threads == 0` means
    /// available hardware parallelism.
    pub fn init(
        &self,
        scheduler: Option<Arc<dyn ThreadScheduler>>,
        io_threads: usize,
        cpu_threads: usize,
    ) -> Result<(), RuntimeError> {
        let _starting = self.starting.lock();
        if self.state.read().is_some() {
            tracing::debug!("[AsyncRuntime] already running, init ignored");
            return Ok(());
        }

        let io_threads = io_threads.max(1);
        let cpu_threads = if cpu_threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            cpu_threads
        };

        let io = WorkerPool::start(ThreadClass::Io, io_threads, scheduler.clone())
            .map_err(RuntimeError::Build)?;
        let cpu = match WorkerPool::start(ThreadClass::Cpu, cpu_threads, scheduler.clone()) {
            Ok(cpu) => cpu,
            Err(e) => {
                io.shutdown();
                return Err(RuntimeError::Build(e));
            }
        };

        *self.state.write() = Some(Running {
            io,
            cpu,
            critical: Vec::new(),
            stop: CancelToken::new_root(),
            scheduler,
        });
        tracing::info!("[AsyncRuntime] started: io={io_threads} cpu={cpu_threads}");
        Ok(())
    }

    pub fn init_with(
        &self,
        cfg: &RuntimeConfig,
        scheduler: Option<Arc<dyn ThreadScheduler>>,
    ) -> Result<(), RuntimeError> {
        self.init(scheduler, cfg.io_threads, cfg.cpu_threads)
    }

    /// Raise the stop signal, stop both pools and join every thread.
    ///
    /// Queued but unstarted work is dropped; jobs already running are waited
    /// for without a time limit, so pool jobs must return. Pending timer waits
    /// complete with `Err(Cancelled)`. A second call finds nothing to do.
    pub fn stop(&self) {
        let Some(running) = self.state.write().take() else {
            return;
        };
        let Running {
            io,
            cpu,
            critical,
            stop,
            ..
        } = running;

        stop.cancel();
        io.shutdown();
        cpu.shutdown();

        let me = thread::current().id();
        for handle in critical {
            if handle.thread().id() == me {
                tracing::warn!("[AsyncRuntime] stop() called from a critical loop, not joining itself");
                continue;
            }
            let name = handle.thread().name().unwrap_or("duplex-crit").to_owned();
            if handle.join().is_err() {
                tracing::error!("[AsyncRuntime] critical loop {name} panicked");
            }
        }
        tracing::info!("[AsyncRuntime] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.read().is_some()
    }

    /// Run `f` on some I/O thread. Dropped when not running.
    pub fn post_io<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.state.read().as_ref() {
            Some(r) => r.io.post(Box::new(f)),
            None => tracing::trace!("[AsyncRuntime] post_io while stopped, job dropped"),
        }
    }

    /// Run `f` on some CPU thread. Dropped when not running.
    pub fn post_cpu<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.state.read().as_ref() {
            Some(r) => r.cpu.post(Box::new(f)),
            None => tracing::trace!("[AsyncRuntime] post_cpu while stopped, job dropped"),
        }
    }

    /// Timer whose callbacks run on the I/O pool.
    ///
    /// Calling this before `init()` is a contract violation: debug builds
    /// panic, release builds get `Err(NotRunning)`.
    pub fn create_timer(&self) -> Result<Timer, RuntimeError> {
        self.with_running(|r| Timer::new(r.io.handle()))
    }

    pub fn create_io_strand(&self) -> Result<Strand, RuntimeError> {
        self.with_running(|r| Strand::new(ThreadClass::Io, r.io.handle()))
    }

    pub fn create_cpu_strand(&self) -> Result<Strand, RuntimeError> {
        self.with_running(|r| Strand::new(ThreadClass::Cpu, r.cpu.handle()))
    }

    /// Dedicated OS thread named `duplex-crit-N`. The scheduler hook and
    /// `policy` are applied on the new thread before `f` runs; `f` gets a
    /// child of the runtime stop token and should return once it trips.
    ///
    /// Returns `Err(NotRunning)` without spawning when the runtime is stopped.
    pub fn spawn_critical_loop<F>(&self, policy: ThreadPolicy, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let mut guard = self.state.write();
        let Some(running) = guard.as_mut() else {
            tracing::debug!("[AsyncRuntime] spawn_critical_loop while stopped, ignored");
            return Err(RuntimeError::NotRunning);
        };

        let index = running.critical.len();
        let token = running.stop.new_child();
        let scheduler = running.scheduler.clone();

        let handle = thread::Builder::new()
            .name(format!("duplex-crit-{index}"))
            .spawn(move || {
                if let Some(s) = scheduler.as_ref() {
                    s.on_thread_start(ThreadClass::Critical, index);
                    s.apply_current_thread_policy(&policy);
                }
                f(token);
            })
            .map_err(RuntimeError::Spawn)?;

        running.critical.push(handle);
        tracing::debug!("[AsyncRuntime] critical loop {index} spawned");
        Ok(())
    }

    /// Pool sizes of the current generation, `None` when stopped.
    pub fn thread_counts(&self) -> Option<(usize, usize)> {
        self.state
            .read()
            .as_ref()
            .map(|r| (r.io.threads(), r.cpu.threads()))
    }

    fn with_running<T>(&self, f: impl FnOnce(&Running) -> T) -> Result<T, RuntimeError> {
        let guard = self.state.read();
        debug_assert!(guard.is_some(), "{ERR_INIT_FIRST}");
        guard.as_ref().map(f).ok_or(RuntimeError::NotRunning)
    }
}

impl Drop for AsyncRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
