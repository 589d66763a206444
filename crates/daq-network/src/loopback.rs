//! In-process transport.
//!
//! A loopback transport hands every complete request frame straight to a
//! [`Dispatcher`] and queues the reply for the next read. The shared
//! [`LoopbackControl`] injects faults: a disconnected loopback fails every
//! transport operation, a stalled one withholds replies until the stall is
//! lifted, after which they arrive late.

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::codec::decode_frame;
use crate::dispatcher::Dispatcher;
use crate::error::{NetError, NetResult};
use crate::transport::{ByteTransport, Connector};

/// Fault switches shared by a loopback connector and its transports.
#[derive(Debug, Default)]
pub struct LoopbackControl {
    disconnected: AtomicBool,
    stalled: AtomicBool,
    requests: AtomicU64,
}

impl LoopbackControl {
    /// Healthy control, shared.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the link down or bring it back.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// True while the link is down.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Withhold replies, or release them.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// True while replies are withheld.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    /// Requests handed to the dispatcher so far.
    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Opens loopback transports to one dispatcher.
#[derive(Clone)]
pub struct LoopbackConnector {
    dispatcher: Arc<Dispatcher>,
    control: Arc<LoopbackControl>,
}

impl LoopbackConnector {
    /// Connector to `dispatcher`, with faults driven by `control`.
    pub fn new(dispatcher: Arc<Dispatcher>, control: Arc<LoopbackControl>) -> Self {
        Self {
            dispatcher,
            control,
        }
    }
}

impl Connector for LoopbackConnector {
    fn connect(&mut self) -> NetResult<Box<dyn ByteTransport>> {
        if self.control.is_disconnected() {
            return Err(NetError::ConnectionLost(format!("{} is down", self.peer())));
        }
        Ok(Box::new(LoopbackTransport {
            dispatcher: Arc::clone(&self.dispatcher),
            control: Arc::clone(&self.control),
            requests: BytesMut::new(),
            held: BytesMut::new(),
            replies: BytesMut::new(),
        }))
    }

    fn peer(&self) -> String {
        format!("loopback:{}", self.dispatcher.name())
    }
}

/// Byte transport backed by an in-process dispatcher.
pub struct LoopbackTransport {
    dispatcher: Arc<Dispatcher>,
    control: Arc<LoopbackControl>,
    requests: BytesMut,
    held: BytesMut,
    replies: BytesMut,
}

impl LoopbackTransport {
    fn check_link(&mut self) -> NetResult<()> {
        if self.control.is_disconnected() {
            return Err(NetError::ConnectionLost("loopback link is down".into()));
        }
        if !self.control.is_stalled() && !self.held.is_empty() {
            let late = self.held.split();
            self.replies.extend_from_slice(&late);
        }
        Ok(())
    }
}

impl ByteTransport for LoopbackTransport {
    fn read(&mut self, max_len: usize) -> NetResult<Bytes> {
        self.check_link()?;
        let len = max_len.min(self.replies.len());
        Ok(self.replies.split_to(len).freeze())
    }

    fn write(&mut self, bytes: &[u8]) -> NetResult<()> {
        self.check_link()?;
        self.requests.extend_from_slice(bytes);
        while let Some(frame) = decode_frame(&mut self.requests)? {
            self.control.requests.fetch_add(1, Ordering::SeqCst);
            let reply = self.dispatcher.handle_frame(frame)?;
            if self.control.is_stalled() {
                trace!(len = reply.len(), "holding reply while stalled");
                self.held.extend_from_slice(&reply);
            } else {
                self.replies.extend_from_slice(&reply);
            }
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> NetResult<usize> {
        self.check_link()?;
        Ok(self.replies.len())
    }

    fn discard_unread(&mut self) -> NetResult<()> {
        self.check_link()?;
        self.replies.clear();
        Ok(())
    }

    fn discard_unwritten(&mut self) -> NetResult<()> {
        self.check_link()?;
        self.requests.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, Message};
    use crate::testing::served_database;

    fn connector() -> (LoopbackConnector, Arc<LoopbackControl>) {
        let control = LoopbackControl::new();
        let dispatcher = Arc::new(Dispatcher::new("loop", served_database()));
        (LoopbackConnector::new(dispatcher, Arc::clone(&control)), control)
    }

    fn hello() -> Bytes {
        encode_frame(1, &Message::Hello { client: "t".into() }).unwrap()
    }

    #[test]
    fn test_request_is_answered_immediately() {
        let (mut connector, control) = connector();
        let mut transport = connector.connect().unwrap();
        let frame = hello();
        transport.write(&frame[..5]).unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);
        transport.write(&frame[5..]).unwrap();
        assert!(transport.bytes_available().unwrap() > 0);
        assert_eq!(control.requests_served(), 1);
    }

    #[test]
    fn test_disconnect_fails_everything() {
        let (mut connector, control) = connector();
        let mut transport = connector.connect().unwrap();
        control.set_disconnected(true);
        assert!(transport.write(&hello()).unwrap_err().is_connection_lost());
        assert!(transport.bytes_available().unwrap_err().is_connection_lost());
        assert!(connector.connect().is_err());

        control.set_disconnected(false);
        assert!(connector.connect().is_ok());
    }

    #[test]
    fn test_stall_delays_replies() {
        let (mut connector, control) = connector();
        let mut transport = connector.connect().unwrap();
        control.set_stalled(true);
        transport.write(&hello()).unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);

        control.set_stalled(false);
        assert!(transport.bytes_available().unwrap() > 0);
    }

    #[test]
    fn test_discard_unread_drops_replies() {
        let (mut connector, _control) = connector();
        let mut transport = connector.connect().unwrap();
        transport.write(&hello()).unwrap();
        transport.discard_unread().unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);
        assert_eq!(connector.peer(), "loopback:loop");
    }
}
