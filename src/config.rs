use crate::utils::logger::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Zero is bumped to one.
    pub io_threads: usize,
    /// Zero means available hardware parallelism.
    pub cpu_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            io_threads: 2,
            cpu_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Receive poll interval; bounds shutdown latency of receive workers.
    pub poll_timeout_ms: u64,
    /// Messages queued per in-process subscriber before new ones are dropped.
    pub send_hwm: usize,
    /// A tcp peer that cannot take a frame within this time is dropped.
    pub write_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            send_hwm: 1_000,
            write_timeout_ms: 100,
        }
    }
}

impl ControlConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FabricConfig {
    /// `None` leaves logging setup to the host application.
    pub logging: Option<LoggerConfig>,
    pub runtime: RuntimeConfig,
    pub control: ControlConfig,
}
