use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const SLEEP_TICK: Duration = Duration::from_millis(10);

/// Shared stop flag.
///
/// The runtime hands one to every critical loop and trips it in `stop()`;
/// control-plane receive workers own a child of the bus token.
/// Cancelling a parent cancels every child, never the other way round.
///
/// A token is its own flag plus the flags of all its ancestors, nearest
/// first, so a check never walks a chain of parents.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    ancestors: Arc<[Arc<AtomicBool>]>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new_root()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .field("depth", &self.ancestors.len())
            .finish()
    }
}

impl CancelToken {
    pub fn new_root() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors: Arc::from(Vec::new()),
        }
    }

    /// Create a child that is cancelled together with `self`.
    pub fn new_child(&self) -> Self {
        let ancestors: Vec<_> = std::iter::once(self.flag.clone())
            .chain(self.ancestors.iter().cloned())
            .collect();
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors: ancestors.into(),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.ancestors.iter().any(|f| f.load(Ordering::Acquire))
    }

    /// Sleep up to `total`, waking early on cancellation.
    /// Returns `false` if the token was cancelled before the time elapsed.
    pub fn sleep_cancellable(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_TICK.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_cancels_child_but_not_reverse() {
        let root = CancelToken::new_root();
        let child = root.new_child();
        let grandchild = child.new_child();

        grandchild.cancel();
        assert!(!root.is_cancelled());
        assert!(!child.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn clones_share_one_flag() {
        let root = CancelToken::new_root();
        let child = root.new_child();
        let alias = child.clone();
        alias.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
        assert!(!root.new_child().is_cancelled());
    }

    #[test]
    fn sleep_wakes_on_cancel() {
        let token = CancelToken::new_root();
        let remote = token.clone();
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let started = Instant::now();
        assert!(!token.sleep_cancellable(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        h.join().unwrap();
    }
}
