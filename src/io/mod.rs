pub mod base;
pub mod mpmc;
pub mod overwrite;

pub use base::{Discipline, StreamQueue};
pub use mpmc::ReliableFifo;
pub use overwrite::RealtimeLatest;

use std::sync::Arc;

/// Build a shared queue of the requested discipline.
pub fn make_queue<T: Send + 'static>(discipline: Discipline) -> Arc<dyn StreamQueue<T>> {
    match discipline {
        Discipline::ReliableFifo => Arc::new(ReliableFifo::new()),
        Discipline::RealtimeLatest => Arc::new(RealtimeLatest::with_capacity(1)),
    }
}
