use crate::error::{TransportError, TransportFailReason, TransportResult};
use crate::transport::{MAX_FRAME_LEN, Publisher, Subscriber};
use crate::utils::backoff::{Backoff, ReconnectCfg};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

const HEADER_LEN: usize = 4;
const READ_CHUNK: usize = 16 * 1024;
const LISTEN_BACKLOG: i32 = 128;

fn resolve(addr: &str, host: &str, port: u16, binding: bool) -> TransportResult<SocketAddr> {
    let host = match host {
        "*" if binding => "0.0.0.0",
        "*" => "127.0.0.1",
        h => h,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::with_source(TransportFailReason::InvalidEndpoint, addr, e))?
        .next()
        .ok_or_else(|| TransportError::new(TransportFailReason::InvalidEndpoint, addr))
}

/// Length-prefixed frame: u32 big-endian length, then the payload.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Pops one complete frame off the front of `buf`, if there is one.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, usize> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(len);
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Listening side. Connections are accepted lazily on each send, so a
/// subscriber only starts receiving after the first send that follows its
/// connect.
pub struct TcpPublisher {
    addr: String,
    listener: Option<TcpListener>,
    peers: Vec<TcpStream>,
    write_timeout: Duration,
}

impl TcpPublisher {
    pub(crate) fn bind(
        addr: &str,
        host: &str,
        port: u16,
        write_timeout: Duration,
    ) -> TransportResult<Self> {
        let sock_addr = resolve(addr, host, port, true)?;
        let bind_err = |e: io::Error| {
            let reason = if e.kind() == ErrorKind::AddrInUse {
                TransportFailReason::AddrInUse
            } else {
                TransportFailReason::Bind
            };
            TransportError::with_source(reason, addr, e)
        };

        let socket = Socket::new(Domain::for_address(sock_addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        // Same as std's TcpListener: on windows SO_REUSEADDR would allow port hijacking.
        #[cfg(unix)]
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&sock_addr.into()).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        tracing::debug!("[Tcp] listening on {sock_addr}");
        Ok(Self {
            addr: addr.to_owned(),
            listener: Some(socket.into()),
            peers: Vec::new(),
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn peers(&self) -> usize {
        self.peers.len()
    }

    fn accept_pending(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    // Accepted sockets may inherit non-blocking mode on some platforms.
                    let configured = stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.set_nodelay(true))
                        .and_then(|_| stream.set_write_timeout(Some(self.write_timeout)));
                    match configured {
                        Ok(()) => {
                            tracing::debug!("[Tcp] {} accepted {peer}", self.addr);
                            self.peers.push(stream);
                        }
                        Err(e) => tracing::warn!("[Tcp] {} rejecting {peer}: {e}", self.addr),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("[Tcp] {} accept failed: {e}", self.addr);
                    break;
                }
            }
        }
    }
}

impl Publisher for TcpPublisher {
    fn send(&mut self, msg: &[u8]) -> TransportResult<()> {
        if self.listener.is_none() {
            return Err(TransportError::closed(self.addr.as_str()));
        }
        if msg.len() > MAX_FRAME_LEN {
            return Err(TransportError::new(TransportFailReason::Protocol, self.addr.as_str()));
        }

        self.accept_pending();
        let frame = encode_frame(msg);
        let addr = &self.addr;
        self.peers.retain_mut(|peer| match peer.write_all(&frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("[Tcp] {addr} dropping peer: {e}");
                false
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.listener.take().is_some() {
            self.peers.clear();
            tracing::debug!("[Tcp] {} closed", self.addr);
        }
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

/// Connecting side. Connection attempts happen inside `recv`, paced by a
/// reconnect backoff, so a subscriber may be created before the publisher binds.
pub struct TcpSubscriber {
    addr: String,
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    buf: BytesMut,
    backoff: Backoff,
    closed: bool,
}

impl TcpSubscriber {
    pub(crate) fn connect(addr: &str, host: &str, port: u16) -> Self {
        Self {
            addr: addr.to_owned(),
            host: host.to_owned(),
            port,
            stream: None,
            buf: BytesMut::with_capacity(READ_CHUNK),
            backoff: Backoff::new(ReconnectCfg::default()),
            closed: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.buf.clear();
        self.backoff.on_failure();
    }

    fn try_connect(&mut self, deadline: Instant) -> TransportResult<bool> {
        let wait = self.backoff.remaining().min(deadline.saturating_duration_since(Instant::now()));
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        if !self.backoff.ready() {
            return Ok(false);
        }

        let sock_addr = resolve(&self.addr, &self.host, self.port, false)?;
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));
        match TcpStream::connect_timeout(&sock_addr, budget) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                tracing::debug!("[Tcp] connected to {sock_addr}");
                self.backoff.on_success();
                self.buf.clear();
                self.stream = Some(stream);
                Ok(true)
            }
            Err(e) => {
                let delay = self.backoff.on_failure();
                tracing::trace!("[Tcp] connect {} failed: {e}, retry in {delay:?}", self.addr);
                Ok(false)
            }
        }
    }
}

impl Subscriber for TcpSubscriber {
    fn recv(&mut self, timeout: Duration) -> TransportResult<Option<Bytes>> {
        if self.closed {
            return Err(TransportError::closed(self.addr.as_str()));
        }
        let deadline = Instant::now() + timeout;

        if self.stream.is_none() && !self.try_connect(deadline)? {
            let rest = deadline.saturating_duration_since(Instant::now());
            thread::sleep(rest.min(self.backoff.remaining()));
            return Ok(None);
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match decode_frame(&mut self.buf) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(len) => {
                    self.disconnect();
                    return Err(TransportError::with_source(
                        TransportFailReason::Protocol,
                        self.addr.as_str(),
                        io::Error::new(ErrorKind::InvalidData, format!("frame of {len} bytes")),
                    ));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            if let Err(e) = stream.set_read_timeout(Some(remaining)) {
                self.disconnect();
                return Err(TransportError::with_source(
                    TransportFailReason::Connect,
                    self.addr.as_str(),
                    e,
                ));
            }

            match stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!("[Tcp] {} peer closed, reconnecting", self.addr);
                    self.disconnect();
                    return Ok(None);
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.disconnect();
                    return Err(TransportError::with_source(
                        TransportFailReason::Connect,
                        self.addr.as_str(),
                        e,
                    ));
                }
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.buf.clear();
        self.closed = true;
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(3);

    fn free_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    #[test]
    fn frame_decoder_handles_partial_input() {
        let frame = encode_frame(b"hello");
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..3]);
        assert_eq!(decode_frame(&mut buf), Ok(None));
        buf.extend_from_slice(&frame[3..7]);
        assert_eq!(decode_frame(&mut buf), Ok(None));
        buf.extend_from_slice(&frame[7..]);
        buf.extend_from_slice(&encode_frame(b""));

        assert_eq!(decode_frame(&mut buf), Ok(Some(Bytes::from_static(b"hello"))));
        assert_eq!(decode_frame(&mut buf), Ok(Some(Bytes::new())));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert_eq!(decode_frame(&mut buf), Err(MAX_FRAME_LEN + 1));
    }

    #[cfg(unix)]
    #[test]
    fn second_bind_on_same_port_fails() {
        let port = free_port();
        let addr = format!("tcp://127.0.0.1:{port}");
        let _first = TcpPublisher::bind(&addr, "127.0.0.1", port, Duration::from_millis(50)).unwrap();
        let second = TcpPublisher::bind(&addr, "127.0.0.1", port, Duration::from_millis(50));
        assert!(second.is_err());
    }

    #[test]
    fn subscriber_receives_after_joining() {
        let port = free_port();
        let addr = format!("tcp://127.0.0.1:{port}");
        let mut publisher =
            TcpPublisher::bind(&addr, "127.0.0.1", port, Duration::from_millis(100)).unwrap();
        let mut sub = TcpSubscriber::connect(&addr, "127.0.0.1", port);

        // Slow joiner: keep sending until the subscriber is accepted.
        let deadline = Instant::now() + WAIT;
        let mut got = None;
        while got.is_none() && Instant::now() < deadline {
            publisher.send(b"tick").unwrap();
            got = sub.recv(Duration::from_millis(20)).unwrap();
        }
        assert_eq!(got, Some(Bytes::from_static(b"tick")));
        assert_eq!(publisher.peers(), 1);
    }

    #[test]
    fn subscriber_without_publisher_times_out() {
        let port = free_port();
        let addr = format!("tcp://127.0.0.1:{port}");
        let mut sub = TcpSubscriber::connect(&addr, "127.0.0.1", port);
        let started = Instant::now();
        assert_eq!(sub.recv(Duration::from_millis(30)).unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!sub.is_connected());
    }

    #[test]
    fn closed_publisher_refuses_send() {
        let port = free_port();
        let addr = format!("tcp://127.0.0.1:{port}");
        let mut publisher =
            TcpPublisher::bind(&addr, "127.0.0.1", port, Duration::from_millis(50)).unwrap();
        publisher.close();
        assert_eq!(
            publisher.send(b"x").err().map(|e| e.reason()),
            Some(TransportFailReason::Closed)
        );
    }
}
