pub mod control;
pub mod data;

pub use control::{ControlBus, ControlCallback};
pub use data::{DataBus, QueueHandle};

use crate::config::ControlConfig;
use crate::error::{BusError, TransportResult};
use crate::io::Discipline;
use std::sync::Arc;

/// Both messaging planes behind one handle.
///
/// The control plane carries small addressed string messages over sockets;
/// the data plane broadcasts shared payloads to in-process queues. The two
/// planes share nothing but this owner.
#[derive(Default)]
pub struct Bus {
    control: ControlBus,
    data: DataBus,
}

impl Bus {
    pub fn new(control: ControlConfig) -> Self {
        Self {
            control: ControlBus::new(control),
            data: DataBus::new(),
        }
    }

    #[inline]
    pub fn publish(&self, endpoint: &str, message: &str) -> TransportResult<()> {
        self.control.publish(endpoint, message)
    }

    #[inline]
    pub fn subscribe<F>(&self, endpoint: &str, callback: F) -> TransportResult<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.control.subscribe(endpoint, callback)
    }

    #[inline]
    pub fn publish_stream<T>(&self, topic: &str, payload: Arc<T>) -> usize
    where
        T: Send + Sync + 'static,
    {
        self.data.publish_stream(topic, payload)
    }

    #[inline]
    pub fn subscribe_stream<T>(
        &self,
        topic: &str,
        discipline: Discipline,
    ) -> Result<QueueHandle<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.data.subscribe_stream(topic, discipline)
    }

    pub fn control(&self) -> &ControlBus {
        &self.control
    }

    pub fn data(&self) -> &DataBus {
        &self.data
    }

    /// Tear down both planes. Idempotent.
    pub fn shutdown(&self) {
        self.control.shutdown();
        self.data.shutdown();
    }
}
