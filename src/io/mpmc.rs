use crate::error::RecvError;
use crate::io::base::{Discipline, StreamQueue};
use crate::utils::CancelToken;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Longest single condvar sleep inside `recv`, bounds cancellation latency.
const RECV_SLICE: Duration = Duration::from_millis(20);

/// Blocking multi-producer/multi-consumer unbounded FIFO.
///
/// Order across producers is the order in which their `push` calls take
/// the lock.
pub struct ReliableFifo<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for ReliableFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReliableFifo<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T: Send> StreamQueue<T> for ReliableFifo<T> {
    fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    #[inline]
    fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    fn wait_and_pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.ready.wait(&mut items);
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn recv(&self, cancel: &CancelToken, timeout: Option<Duration>) -> Result<T, RecvError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Ok(item);
            }
            if cancel.is_cancelled() {
                return Err(RecvError::Cancelled);
            }
            let slice = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(RecvError::Timeout);
                    }
                    left.min(RECV_SLICE)
                }
                None => RECV_SLICE,
            };
            self.ready.wait_for(&mut items, slice);
        }
    }

    #[inline]
    fn discipline(&self) -> Discipline {
        Discipline::ReliableFifo
    }

    fn drain(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }
}
