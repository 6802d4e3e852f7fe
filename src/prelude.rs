pub use crate::bus::{Bus, ControlBus, ControlCallback, DataBus, QueueHandle};
pub use crate::config::{ControlConfig, FabricConfig, RuntimeConfig};
pub use crate::error::{
    BusError, RecvError, RuntimeError, TimerError, TransportError, TransportFailReason,
    TransportResult,
};
pub use crate::io::{Discipline, RealtimeLatest, ReliableFifo, StreamQueue, make_queue};
pub use crate::runtime::{
    AsyncRuntime, CorePinScheduler, Executor, Job, Strand, ThreadClass, ThreadPolicy,
    ThreadScheduler, Timer,
};
pub use crate::service::InfraService;
pub use crate::utils::CancelToken;
pub use crate::utils::logger::LoggerConfig;
