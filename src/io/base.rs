use crate::error::RecvError;
use crate::utils::CancelToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queueing policy of a data-plane subscriber, fixed at creation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// Unbounded, push order preserved, never drops.
    #[default]
    ReliableFifo,
    /// Single slot; every push overwrites the unread value.
    RealtimeLatest,
}

/// Capability shared by both queue disciplines.
///
/// `push` never fails and only waits on lock contention. `is_empty` is a
/// snapshot and may be stale by the time the caller acts on it.
pub trait StreamQueue<T: Send>: Send + Sync {
    fn push(&self, item: T);

    /// Non-blocking pop.
    fn try_pop(&self) -> Option<T>;

    /// Block the caller until an item is available.
    fn wait_and_pop(&self) -> T;

    fn is_empty(&self) -> bool;

    /// Cooperative wait honouring a stop token and an optional timeout.
    fn recv(&self, cancel: &CancelToken, timeout: Option<Duration>) -> Result<T, RecvError>;

    fn discipline(&self) -> Discipline;

    /// Pop up to `max` items without blocking.
    fn drain(&self, max: usize) -> Vec<T> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.try_pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }
}
