//! TCP transport to the relay
//!
//! Connecting and the handshake run on a blocking [`std::net::TcpStream`]
//! with timeouts. Once the relay accepts the handshake the stream is handed
//! to mio and every later send or receive goes through a short readiness
//! wait followed by a non-blocking call.

use crate::networking::protocol::codec::{self, HandshakeReply, TERMINATOR};
use crate::networking::{SyncError, SyncResult};
use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const RELAY: Token = Token(0);

/// Turns the configured server host into a socket address
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> SyncResult<SocketAddr>;
}

/// Resolver backed by the system's name lookup, preferring IPv4
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> SyncResult<SocketAddr> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| SyncError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| SyncError::Resolve {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            })
    }
}

/// Open a low-latency stream to the relay
pub fn connect(addr: SocketAddr, timeout: Duration) -> SyncResult<TcpStream> {
    info!("Connecting to relay at {}", addr);
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Send the handshake frame and block until the relay answers
///
/// Returns the validated reply and any bytes that arrived after its
/// terminator.
pub fn handshake(
    stream: &mut TcpStream,
    scene_id: &str,
    timeout: Duration,
    max_reply: usize,
) -> SyncResult<(HandshakeReply, Vec<u8>)> {
    let deadline = Instant::now() + timeout;

    stream.set_write_timeout(Some(timeout))?;
    stream
        .write_all(&codec::handshake_frame(scene_id))
        .map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => SyncError::HandshakeTimeout,
            _ => SyncError::from(e),
        })?;

    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    let end = loop {
        if let Some(end) = received.iter().position(|&b| b == TERMINATOR) {
            break end;
        }
        if received.len() > max_reply {
            return Err(SyncError::FrameOverflow { limit: max_reply });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SyncError::HandshakeTimeout);
        }
        stream.set_read_timeout(Some(remaining))?;

        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(SyncError::HandshakeRejected {
                    reason: "connection closed before reply".to_string(),
                })
            }
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(SyncError::HandshakeTimeout)
            }
            Err(e) => return Err(e.into()),
        }
    };

    let text = String::from_utf8_lossy(&received[..end]);
    debug!("Handshake reply: {:?}", text);
    let reply = codec::parse_handshake_reply(&text)?;
    let leftover = received.split_off(end + 1);
    Ok((reply, leftover))
}

/// Non-blocking relay stream with readiness polling
///
/// mio reports readiness edges, so the last known readiness is cached and
/// cleared whenever a call hits `WouldBlock`.
pub struct TcpTransport {
    stream: MioTcpStream,
    poll: Poll,
    events: Events,
    readable: bool,
    writable: bool,
    peer: SocketAddr,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

impl TcpTransport {
    /// Switch a connected stream to non-blocking mode and wait until it is writable
    pub fn from_std(stream: TcpStream, writable_timeout: Duration) -> SyncResult<Self> {
        let peer = stream.peer_addr()?;
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        stream.set_nonblocking(true)?;

        let mut stream = MioTcpStream::from_std(stream);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, RELAY, Interest::READABLE | Interest::WRITABLE)?;

        let mut transport = Self {
            stream,
            poll,
            events: Events::with_capacity(8),
            // bytes may already be buffered from before registration
            readable: true,
            writable: false,
            peer,
        };

        if !transport.wait_writable(writable_timeout)? {
            return Err(SyncError::NotWritable);
        }
        debug!("Relay stream {} is writable", peer);
        Ok(transport)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn poll_readiness(&mut self, timeout: Duration) -> SyncResult<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        for event in self.events.iter() {
            if event.token() != RELAY {
                continue;
            }
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.readable = true;
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                self.writable = true;
            }
        }
        Ok(())
    }

    fn wait_for(&mut self, interest: Interest, timeout: Duration) -> SyncResult<bool> {
        let ready = |t: &Self| {
            if interest.is_readable() {
                t.readable
            } else {
                t.writable
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            if ready(self) {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            self.poll_readiness(remaining)?;
        }
    }

    /// Wait up to `timeout` for the socket to accept writes
    pub fn wait_writable(&mut self, timeout: Duration) -> SyncResult<bool> {
        self.wait_for(Interest::WRITABLE, timeout)
    }

    /// Wait up to `timeout` for incoming bytes
    pub fn wait_readable(&mut self, timeout: Duration) -> SyncResult<bool> {
        self.wait_for(Interest::READABLE, timeout)
    }

    /// Write as much of `buf` as the socket takes, `Ok(0)` if it would block
    pub fn try_write(&mut self, buf: &[u8]) -> SyncResult<usize> {
        loop {
            match self.stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.writable = false;
                    return Ok(0);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one chunk, `Ok(None)` if nothing is available
    ///
    /// An orderly close by the relay is reported as [`SyncError::PeerRejected`].
    pub fn try_read(&mut self, buf: &mut [u8]) -> SyncResult<Option<usize>> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => {
                    return Err(SyncError::PeerRejected {
                        reason: "relay closed the connection".to_string(),
                    })
                }
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.readable = false;
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn resolves_loopback_to_ipv4() {
        let addr = SystemResolver.resolve("127.0.0.1", 8888).unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 8888);
    }

    #[test]
    fn handshake_and_non_blocking_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"INITFRAME"));
            socket.write_all(b"client_version: OK|none").unwrap();

            let n = socket.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"S|");
            socket.write_all(b"|").unwrap();
        });

        let mut stream = connect(addr, Duration::from_secs(1)).unwrap();
        let (reply, leftover) =
            handshake(&mut stream, "scene", Duration::from_secs(1), 1024).unwrap();
        assert!(reply.notices.is_empty());
        assert_eq!(leftover, b"none".to_vec());

        let mut transport = TcpTransport::from_std(stream, Duration::from_secs(1)).unwrap();
        assert_eq!(transport.try_write(b"S|").unwrap(), 2);

        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        let deadline = Instant::now() + Duration::from_secs(2);
        while !received.ends_with(b"|") && Instant::now() < deadline {
            if transport.wait_readable(Duration::from_millis(50)).unwrap() {
                if let Some(n) = transport.try_read(&mut buf).unwrap() {
                    received.extend_from_slice(&buf[..n]);
                }
            }
        }
        assert_eq!(received, b"|".to_vec());
        relay.join().unwrap();
    }
}
