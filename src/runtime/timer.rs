use crate::error::TimerError;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// One-shot relative timer bound to the I/O pool.
///
/// Every callback runs exactly once: `Ok(())` when the deadline passes,
/// `Err(Cancelled)` otherwise. A wait is cancelled by `cancel()`, by
/// re-arming with `expires_after`, by dropping the timer, or by stopping the
/// runtime. Callbacks run on an I/O pool thread, except those cancelled by
/// `AsyncRuntime::stop()`, which run on whichever thread tears the wait down
/// (for a timer outlived by its runtime, the thread calling `async_wait`).
/// An unarmed timer is already expired.
pub struct Timer {
    handle: Handle,
    state: Mutex<TimerState>,
}

/// Owns a callback until it is completed; completes it with `Cancelled` if
/// the wait task is dropped before that.
struct PendingWait<F>
where
    F: FnOnce(Result<(), TimerError>),
{
    callback: Option<F>,
}

impl<F> PendingWait<F>
where
    F: FnOnce(Result<(), TimerError>),
{
    fn complete(mut self, outcome: Result<(), TimerError>) {
        if let Some(cb) = self.callback.take() {
            cb(outcome);
        }
    }
}

impl<F> Drop for PendingWait<F>
where
    F: FnOnce(Result<(), TimerError>),
{
    fn drop(&mut self) {
        if let Some(cb) = self.callback.take() {
            cb(Err(TimerError::Cancelled));
        }
    }
}

struct TimerState {
    deadline: Instant,
    waiters: Vec<oneshot::Sender<()>>,
}

impl TimerState {
    fn cancel_waiters(&mut self) -> usize {
        let mut cancelled = 0;
        for w in self.waiters.drain(..) {
            if w.send(()).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl Timer {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            state: Mutex::new(TimerState {
                deadline: Instant::now(),
                waiters: Vec::new(),
            }),
        }
    }

    /// Set a new deadline relative to now. Returns how many pending waits
    /// were cancelled by re-arming.
    pub fn expires_after(&self, after: Duration) -> usize {
        let mut st = self.state.lock();
        st.deadline = Instant::now() + after;
        st.cancel_waiters()
    }

    pub fn expiry(&self) -> Instant {
        self.state.lock().deadline
    }

    pub fn async_wait<F>(&self, callback: F)
    where
        F: FnOnce(Result<(), TimerError>) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<()>();
        let deadline = {
            let mut st = self.state.lock();
            st.waiters.retain(|w| !w.is_closed());
            st.waiters.push(tx);
            st.deadline
        };

        let pending = PendingWait {
            callback: Some(callback),
        };
        self.handle.spawn(async move {
            let outcome = tokio::select! {
                biased;
                // A dropped sender means the timer itself is gone.
                _ = rx => Err(TimerError::Cancelled),
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => Ok(()),
            };
            pending.complete(outcome);
        });
    }

    /// Cancel every pending wait; returns how many were cancelled.
    pub fn cancel(&self) -> usize {
        self.state.lock().cancel_waiters()
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Timer")
            .field("deadline", &st.deadline)
            .field("waiters", &st.waiters.len())
            .finish()
    }
}
