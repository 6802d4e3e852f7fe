use crate::error::RecvError;
use crate::io::base::{Discipline, StreamQueue};
use crate::utils::CancelToken;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Single-slot "latest value wins" queue.
///
/// A slow consumer only ever sees the most recent value at pop time.
/// Waiting spins and yields instead of parking, so prefer `try_pop` from
/// consumers that care about CPU usage.
pub struct RealtimeLatest<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for RealtimeLatest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RealtimeLatest<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Capacity is accepted for interface parity; the queue always has one slot.
    pub fn with_capacity(_capacity: usize) -> Self {
        Self::new()
    }
}

impl<T: Send> StreamQueue<T> for RealtimeLatest<T> {
    #[inline]
    fn push(&self, item: T) {
        *self.slot.lock() = Some(item);
    }

    #[inline]
    fn try_pop(&self) -> Option<T> {
        self.slot.lock().take()
    }

    fn wait_and_pop(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            backoff.snooze();
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn recv(&self, cancel: &CancelToken, timeout: Option<Duration>) -> Result<T, RecvError> {
        let start = Instant::now();
        let backoff = Backoff::new();
        loop {
            if let Some(item) = self.try_pop() {
                return Ok(item);
            }
            if cancel.is_cancelled() {
                return Err(RecvError::Cancelled);
            }
            if let Some(t) = timeout
                && start.elapsed() >= t
            {
                return Err(RecvError::Timeout);
            }
            backoff.snooze();
        }
    }

    #[inline]
    fn discipline(&self) -> Discipline {
        Discipline::RealtimeLatest
    }
}
