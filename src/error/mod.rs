// error.rs
use std::{error::Error, fmt, io};

const ERR_MSG_TIMEOUT: &str = "operation timed out";
const ERR_MSG_CANCELLED: &str = "operation cancelled";
const ERR_MSG_NOT_RUNNING: &str = "runtime is not running";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransportFailReason {
    /// Transport context could not be created or was already terminated.
    Context,
    InvalidEndpoint,
    Unsupported,
    AddrInUse,
    /// In-process connect before any bind on that name.
    ConnectionRefused,
    Bind,
    Connect,
    Send,
    /// Socket was closed by bus shutdown.
    Closed,
    Protocol,
}

impl fmt::Display for TransportFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TransportFailReason::Context => "transport context unavailable",
            TransportFailReason::InvalidEndpoint => "invalid endpoint",
            TransportFailReason::Unsupported => "unsupported transport scheme",
            TransportFailReason::AddrInUse => "address already in use",
            TransportFailReason::ConnectionRefused => "connection refused",
            TransportFailReason::Bind => "bind failed",
            TransportFailReason::Connect => "connect failed",
            TransportFailReason::Send => "send failed",
            TransportFailReason::Closed => "socket closed",
            TransportFailReason::Protocol => "protocol violation",
        };
        f.write_str(msg)
    }
}

/// Control-plane failure returned synchronously from `publish`/`subscribe`.
#[derive(Debug)]
pub struct TransportError {
    pub reason: TransportFailReason,
    pub endpoint: String,
    pub source: Option<io::Error>,
}

pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    pub fn new(reason: TransportFailReason, endpoint: impl Into<String>) -> Self {
        Self {
            reason,
            endpoint: endpoint.into(),
            source: None,
        }
    }

    pub fn with_source(
        reason: TransportFailReason,
        endpoint: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self {
            reason,
            endpoint: endpoint.into(),
            source: Some(source),
        }
    }

    pub fn closed(endpoint: impl Into<String>) -> Self {
        Self::new(TransportFailReason::Closed, endpoint)
    }

    #[inline]
    pub fn reason(&self) -> TransportFailReason {
        self.reason
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(err) => write!(f, "{} on '{}': {err}", self.reason, self.endpoint),
            None => write!(f, "{} on '{}'", self.reason, self.endpoint),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn Error + 'static))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecvError {
    Timeout,
    Cancelled,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::Timeout => write!(f, "{ERR_MSG_TIMEOUT}"),
            RecvError::Cancelled => write!(f, "{ERR_MSG_CANCELLED}"),
        }
    }
}

impl Error for RecvError {}

/// Outcome delivered to a timer callback that did not fire normally.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerError {
    Cancelled,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::Cancelled => write!(f, "timer {ERR_MSG_CANCELLED}"),
        }
    }
}

impl Error for TimerError {}

#[derive(Debug)]
pub enum RuntimeError {
    NotRunning,
    Build(io::Error),
    Spawn(io::Error),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::NotRunning => write!(f, "{ERR_MSG_NOT_RUNNING}"),
            RuntimeError::Build(err) => write!(f, "failed to build worker pool: {err}"),
            RuntimeError::Spawn(err) => write!(f, "failed to spawn thread: {err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Build(err) | RuntimeError::Spawn(err) => Some(err),
            RuntimeError::NotRunning => None,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BusError {
    /// Topic already carries a different payload type.
    TypeMismatch { topic: String },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::TypeMismatch { topic } => {
                write!(f, "topic '{topic}' is registered with a different payload type")
            }
        }
    }
}

impl Error for BusError {}
