//! Minimal pub/sub sockets for the control plane.
//!
//! Two schemes are understood: `inproc://name` (same [`Context`] only) and
//! `tcp://host:port`. A publisher binds, subscribers connect. Delivery is
//! best-effort; a subscriber that is not attached yet simply misses messages.

pub mod inproc;
pub mod tcp;

use crate::config::ControlConfig;
use crate::error::{TransportError, TransportFailReason, TransportResult};
use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Largest payload a tcp frame may carry.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const INPROC_PREFIX: &str = "inproc://";
const TCP_PREFIX: &str = "tcp://";

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Endpoint {
    Inproc(String),
    /// `*` as host means every interface when binding and loopback when connecting.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    pub fn parse(addr: &str) -> TransportResult<Self> {
        let invalid = || TransportError::new(TransportFailReason::InvalidEndpoint, addr);

        if let Some(name) = addr.strip_prefix(INPROC_PREFIX) {
            if name.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::Inproc(name.to_owned()));
        }

        if let Some(rest) = addr.strip_prefix(TCP_PREFIX) {
            let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(invalid());
            }
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            return Ok(Endpoint::Tcp {
                host: host.to_owned(),
                port,
            });
        }

        if addr.contains("://") {
            Err(TransportError::new(TransportFailReason::Unsupported, addr))
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inproc(name) => write!(f, "{INPROC_PREFIX}{name}"),
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "{TCP_PREFIX}[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "{TCP_PREFIX}{host}:{port}"),
        }
    }
}

/// Sending half; one per bound endpoint.
pub trait Publisher: Send {
    fn send(&mut self, msg: &[u8]) -> TransportResult<()>;

    /// Release the socket. Further sends fail with `Closed`.
    fn close(&mut self);

    fn endpoint(&self) -> &str;
}

/// Receiving half; owned by exactly one receive thread.
pub trait Subscriber: Send {
    /// Wait up to `timeout` for one message. `Ok(None)` means nothing arrived.
    fn recv(&mut self, timeout: Duration) -> TransportResult<Option<Bytes>>;

    fn close(&mut self);

    fn endpoint(&self) -> &str;
}

/// Shared transport state: the in-process endpoint registry plus socket options.
///
/// Cheap to clone. After `terminate()` every bind/connect fails with
/// `TransportFailReason::Context` and in-process publishers are detached.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: Uuid,
    hubs: Mutex<AHashMap<String, Arc<inproc::Hub>>>,
    terminated: AtomicBool,
    send_hwm: usize,
    write_timeout: Duration,
}

impl Context {
    pub fn new(cfg: &ControlConfig) -> Self {
        let ctx = Self {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                hubs: Mutex::new(AHashMap::new()),
                terminated: AtomicBool::new(false),
                send_hwm: cfg.send_hwm.max(1),
                write_timeout: cfg.write_timeout(),
            }),
        };
        tracing::debug!("[Transport] context {} created", ctx.inner.id);
        ctx
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn bind(&self, addr: &str) -> TransportResult<Box<dyn Publisher>> {
        self.ensure_alive(addr)?;
        match Endpoint::parse(addr)? {
            Endpoint::Inproc(name) => {
                let publisher = inproc::InprocPublisher::bind(self.clone(), name, addr)?;
                Ok(Box::new(publisher))
            }
            Endpoint::Tcp { host, port } => {
                let publisher =
                    tcp::TcpPublisher::bind(addr, &host, port, self.inner.write_timeout)?;
                Ok(Box::new(publisher))
            }
        }
    }

    pub fn connect(&self, addr: &str) -> TransportResult<Box<dyn Subscriber>> {
        self.ensure_alive(addr)?;
        match Endpoint::parse(addr)? {
            Endpoint::Inproc(name) => {
                let subscriber = inproc::InprocSubscriber::connect(self.clone(), name, addr)?;
                Ok(Box::new(subscriber))
            }
            Endpoint::Tcp { host, port } => Ok(Box::new(tcp::TcpSubscriber::connect(addr, &host, port))),
        }
    }

    /// Detach every in-process endpoint and refuse new sockets.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let hubs: Vec<_> = self.inner.hubs.lock().drain().map(|(_, hub)| hub).collect();
        for hub in hubs {
            hub.close();
        }
        tracing::debug!("[Transport] context {} terminated", self.inner.id);
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    fn ensure_alive(&self, addr: &str) -> TransportResult<()> {
        if self.is_terminated() {
            Err(TransportError::new(TransportFailReason::Context, addr))
        } else {
            Ok(())
        }
    }

    pub(crate) fn register_hub(&self, name: &str, addr: &str) -> TransportResult<Arc<inproc::Hub>> {
        let mut hubs = self.inner.hubs.lock();
        // Checked again under the lock: terminate() drains this map.
        self.ensure_alive(addr)?;
        if hubs.contains_key(name) {
            return Err(TransportError::new(TransportFailReason::AddrInUse, addr));
        }
        let hub = Arc::new(inproc::Hub::new(self.inner.send_hwm));
        hubs.insert(name.to_owned(), hub.clone());
        Ok(hub)
    }

    pub(crate) fn lookup_hub(&self, name: &str) -> Option<Arc<inproc::Hub>> {
        self.inner.hubs.lock().get(name).cloned()
    }

    pub(crate) fn unregister_hub(&self, name: &str, hub: &Arc<inproc::Hub>) {
        let mut hubs = self.inner.hubs.lock();
        if hubs.get(name).is_some_and(|h| Arc::ptr_eq(h, hub)) {
            hubs.remove(name);
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
