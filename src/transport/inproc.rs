use crate::error::{TransportError, TransportFailReason, TransportResult};
use crate::transport::{Context, Publisher, Subscriber};
use bytes::Bytes;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Fan-out point of one bound in-process endpoint.
pub(crate) struct Hub {
    subscribers: Mutex<Vec<Sender<Bytes>>>,
    hwm: usize,
}

impl Hub {
    pub(crate) fn new(hwm: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            hwm,
        }
    }

    fn attach(&self) -> Receiver<Bytes> {
        let (tx, rx) = bounded(self.hwm);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Returns how many subscribers took the message.
    fn broadcast(&self, msg: Bytes) -> usize {
        let mut delivered = 0;
        self.subscribers.lock().retain(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            // Over the high-water mark: this subscriber misses the message.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    pub(crate) fn close(&self) {
        self.subscribers.lock().clear();
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

pub struct InprocPublisher {
    ctx: Context,
    name: String,
    addr: String,
    hub: Option<Arc<Hub>>,
}

impl InprocPublisher {
    pub(crate) fn bind(ctx: Context, name: String, addr: &str) -> TransportResult<Self> {
        let hub = ctx.register_hub(&name, addr)?;
        tracing::debug!("[Inproc] bound {addr}");
        Ok(Self {
            ctx,
            name,
            addr: addr.to_owned(),
            hub: Some(hub),
        })
    }

    /// Subscribers currently attached.
    pub fn peers(&self) -> usize {
        self.hub.as_ref().map_or(0, |h| h.subscriber_count())
    }
}

impl Publisher for InprocPublisher {
    fn send(&mut self, msg: &[u8]) -> TransportResult<()> {
        let hub = self
            .hub
            .as_ref()
            .ok_or_else(|| TransportError::closed(self.addr.as_str()))?;
        hub.broadcast(Bytes::copy_from_slice(msg));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(hub) = self.hub.take() {
            self.ctx.unregister_hub(&self.name, &hub);
            hub.close();
            tracing::debug!("[Inproc] unbound {}", self.addr);
        }
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

impl Drop for InprocPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct InprocSubscriber {
    ctx: Context,
    name: String,
    addr: String,
    rx: Option<Receiver<Bytes>>,
    closed: bool,
}

impl InprocSubscriber {
    /// The name must already be bound in `ctx`.
    pub(crate) fn connect(ctx: Context, name: String, addr: &str) -> TransportResult<Self> {
        let hub = ctx
            .lookup_hub(&name)
            .ok_or_else(|| TransportError::new(TransportFailReason::ConnectionRefused, addr))?;
        let rx = hub.attach();
        tracing::debug!("[Inproc] connected {addr}");
        Ok(Self {
            ctx,
            name,
            addr: addr.to_owned(),
            rx: Some(rx),
            closed: false,
        })
    }
}

impl Subscriber for InprocSubscriber {
    fn recv(&mut self, timeout: Duration) -> TransportResult<Option<Bytes>> {
        if self.closed {
            return Err(TransportError::closed(self.addr.as_str()));
        }

        if self.rx.is_none() {
            // The publisher went away; pick the name up again if it was re-bound.
            match self.ctx.lookup_hub(&self.name) {
                Some(hub) => {
                    tracing::debug!("[Inproc] re-attached {}", self.addr);
                    self.rx = Some(hub.attach());
                }
                None => {
                    thread::sleep(timeout);
                    return Ok(None);
                }
            }
        }

        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.rx = None;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.rx = None;
        self.closed = true;
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}
