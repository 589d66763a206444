//! Byte transports.
//!
//! A [`ByteTransport`] is a non-blocking byte pipe: writes go out whole,
//! reads return whatever has arrived. A [`Connector`] opens a fresh
//! transport, which is how a server connection reconnects after a
//! transport failure.
//!
//! [`TcpTransport`] is the real one. The in-process loopback lives in
//! [`crate::loopback`].

use bytes::{Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::error::{NetError, NetResult};

/// Non-blocking byte pipe to a server.
pub trait ByteTransport: Send {
    /// Up to `max_len` bytes that have already arrived; empty if none.
    fn read(&mut self, max_len: usize) -> NetResult<Bytes>;

    /// Send all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> NetResult<()>;

    /// Number of bytes ready to be read without blocking.
    fn bytes_available(&mut self) -> NetResult<usize>;

    /// Drop everything received but not yet read.
    fn discard_unread(&mut self) -> NetResult<()>;

    /// Drop everything queued but not yet sent.
    fn discard_unwritten(&mut self) -> NetResult<()>;
}

/// Opens transports to one server.
pub trait Connector: Send {
    /// Open a new transport.
    fn connect(&mut self) -> NetResult<Box<dyn ByteTransport>>;

    /// Peer description for log messages.
    fn peer(&self) -> String;
}

// =============================================================================
// TCP
// =============================================================================

const READ_CHUNK: usize = 4096;

/// TCP byte transport over a non-blocking socket.
pub struct TcpTransport {
    stream: TcpStream,
    inbound: BytesMut,
    write_timeout: Duration,
}

impl TcpTransport {
    /// Wrap a connected stream. Writes that cannot complete within
    /// `write_timeout` fail the transport.
    pub fn new(stream: TcpStream, write_timeout: Duration) -> NetResult<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            write_timeout,
        })
    }

    /// Move everything the socket has into the inbound buffer.
    fn fill(&mut self) -> NetResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(NetError::ConnectionLost("peer closed the connection".into())),
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ByteTransport for TcpTransport {
    fn read(&mut self, max_len: usize) -> NetResult<Bytes> {
        self.fill()?;
        let len = max_len.min(self.inbound.len());
        Ok(self.inbound.split_to(len).freeze())
    }

    fn write(&mut self, bytes: &[u8]) -> NetResult<()> {
        let deadline = Instant::now() + self.write_timeout;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match self.stream.write(remaining) {
                Ok(0) => return Err(NetError::ConnectionLost("socket closed during write".into())),
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(NetError::ConnectionLost(format!(
                            "write stalled for {:?}",
                            self.write_timeout
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> NetResult<usize> {
        self.fill()?;
        Ok(self.inbound.len())
    }

    fn discard_unread(&mut self) -> NetResult<()> {
        self.fill()?;
        let discarded = self.inbound.len();
        self.inbound.clear();
        if discarded > 0 {
            debug!(discarded, "discarded unread bytes");
        }
        Ok(())
    }

    fn discard_unwritten(&mut self) -> NetResult<()> {
        // Writes complete before returning; nothing is queued locally.
        self.stream.flush()?;
        Ok(())
    }
}

/// Connects to `hostname:port` over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    hostname: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    /// Connector for `hostname:port`; `timeout` bounds connecting and writing.
    pub fn new(hostname: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            timeout,
        }
    }
}

impl Connector for TcpConnector {
    #[instrument(skip(self), fields(peer = %self.peer()))]
    fn connect(&mut self) -> NetResult<Box<dyn ByteTransport>> {
        let addresses = (self.hostname.as_str(), self.port).to_socket_addrs()?;
        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.timeout) {
                Ok(stream) => {
                    debug!(%address, "connected");
                    return Ok(Box::new(TcpTransport::new(stream, self.timeout)?));
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => e.into(),
            None => NetError::ConnectionLost(format!("'{}' did not resolve", self.hostname)),
        })
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (TcpTransport::new(client, Duration::from_secs(1)).unwrap(), peer)
    }

    fn wait_for(transport: &mut TcpTransport, len: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let available = transport.bytes_available().unwrap();
            if available >= len || Instant::now() >= deadline {
                return available;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_reads_are_non_blocking_and_bounded() {
        let (mut transport, mut peer) = pair();
        assert_eq!(transport.bytes_available().unwrap(), 0);
        assert!(transport.read(16).unwrap().is_empty());

        peer.write_all(b"hello world").unwrap();
        assert_eq!(wait_for(&mut transport, 11), 11);
        assert_eq!(&transport.read(5).unwrap()[..], b"hello");
        assert_eq!(&transport.read(64).unwrap()[..], b" world");
    }

    #[test]
    fn test_write_reaches_peer() {
        let (mut transport, mut peer) = pair();
        transport.write(b"ping").unwrap();
        let mut received = [0u8; 4];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"ping");
    }

    #[test]
    fn test_discard_unread_drops_pending_bytes() {
        let (mut transport, mut peer) = pair();
        peer.write_all(b"stale").unwrap();
        wait_for(&mut transport, 5);
        transport.discard_unread().unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);
    }

    #[test]
    fn test_peer_close_is_connection_lost() {
        let (mut transport, peer) = pair();
        drop(peer);
        let deadline = Instant::now() + Duration::from_secs(2);
        let result = loop {
            match transport.bytes_available() {
                Ok(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
                other => break other,
            }
        };
        assert!(matches!(result, Err(NetError::ConnectionLost(_))));
    }

    #[test]
    fn test_connector_opens_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut connector = TcpConnector::new("127.0.0.1", port, Duration::from_secs(1));
        let mut transport = connector.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        transport.write(b"hi").unwrap();
        let mut received = [0u8; 2];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"hi");
    }

    #[test]
    fn test_connect_refused_is_connection_lost() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut connector = TcpConnector::new("127.0.0.1", port, Duration::from_millis(200));
        assert!(matches!(connector.connect(), Err(NetError::ConnectionLost(_))));
        assert_eq!(connector.peer(), format!("127.0.0.1:{port}"));
    }
}
