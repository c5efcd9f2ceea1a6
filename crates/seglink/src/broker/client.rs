//! Async broker connections.
//!
//! [`BrokerConnection`] is the daemon side: it queues outbound
//! requests, flushes them on the event loop, and yields typed inbound
//! events. [`BrokerPeer`] is the mirror image used by the broker
//! process for one accepted client.
//!
//! The connection implements [`SidBackend`] by queueing: a queued
//! frame counts as sent for the installation controller. If the
//! flush later fails the connection is considered lost, the caller
//! clears every SENT flag and replays on reconnect, which subsumes
//! any frames the dead socket swallowed.

use std::path::Path;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::{Error, Result};
use crate::install::{SidBackend, SidInstall, SidUninstall};

use super::codec::{self, FRAME_HDRLEN};
use super::proto::{BrokerEvent, BrokerRequest};

/// Read buffer growth increment.
const READ_CHUNK: usize = 4096;

async fn read_frame(
    stream: &mut UnixStream,
    rx_buf: &mut BytesMut,
) -> Result<BytesMut> {
    loop {
        if let Some(len) = codec::frame_len(rx_buf) {
            if len < FRAME_HDRLEN {
                return Err(Error::Decode(format!("frame length {} below header", len)));
            }
            if rx_buf.len() >= len {
                return Ok(rx_buf.split_to(len));
            }
        }
        rx_buf.reserve(READ_CHUNK);
        let n = stream.read_buf(rx_buf).await?;
        if n == 0 {
            return Err(Error::BrokerClosed);
        }
    }
}

/// Daemon-side connection to the broker.
#[derive(Debug)]
pub struct BrokerConnection {
    stream: UnixStream,
    tx_queue: Vec<u8>,
    rx_buf: BytesMut,
}

impl BrokerConnection {
    /// Connect to the broker socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self {
            stream,
            tx_queue: Vec::new(),
            rx_buf: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    /// Queue a request for the next flush.
    pub fn queue(&mut self, req: &BrokerRequest) {
        let frame = codec::encode_request(req);
        trace!(len = frame.len(), "queued broker frame");
        self.tx_queue.extend_from_slice(&frame);
    }

    /// Whether queued frames are waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.tx_queue.is_empty()
    }

    /// Write every queued frame to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        if self.tx_queue.is_empty() {
            return Ok(());
        }
        let queue = std::mem::take(&mut self.tx_queue);
        self.stream.write_all(&queue).await?;
        Ok(())
    }

    /// Queue and flush in one step.
    pub async fn send(&mut self, req: &BrokerRequest) -> Result<()> {
        self.queue(req);
        self.flush().await
    }

    /// Receive the next event. Returns [`Error::BrokerClosed`] when
    /// the broker hangs up.
    pub async fn recv(&mut self) -> Result<BrokerEvent> {
        let frame = read_frame(&mut self.stream, &mut self.rx_buf).await?;
        codec::decode_event(frame.chunk())
    }
}

impl SidBackend for BrokerConnection {
    fn add_local_sid(&mut self, req: &SidInstall) -> Result<()> {
        self.queue(&BrokerRequest::AddLocalSid(req.clone()));
        Ok(())
    }

    fn del_local_sid(&mut self, req: &SidUninstall) -> Result<()> {
        self.queue(&BrokerRequest::DelLocalSid(*req));
        Ok(())
    }
}

/// Broker-side connection to one accepted daemon.
#[derive(Debug)]
pub struct BrokerPeer {
    stream: UnixStream,
    rx_buf: BytesMut,
}

impl BrokerPeer {
    /// Wrap an accepted stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            rx_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Receive the next request from the daemon.
    pub async fn recv(&mut self) -> Result<BrokerRequest> {
        let frame = read_frame(&mut self.stream, &mut self.rx_buf).await?;
        codec::decode_request(frame.chunk())
    }

    /// Push an event to the daemon.
    pub async fn send(&mut self, event: &BrokerEvent) -> Result<()> {
        let frame = codec::encode_event(event);
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::ResourceEvent;
    use std::net::Ipv6Addr;

    fn addr(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_request_and_event_over_socketpair() {
        let (client_stream, server_stream) = UnixStream::pair().unwrap();
        let mut client = BrokerConnection {
            stream: client_stream,
            tx_queue: Vec::new(),
            rx_buf: BytesMut::new(),
        };
        let mut peer = BrokerPeer::new(server_stream);

        let req = BrokerRequest::NexthopRegister {
            addr: addr("fe80::1"),
        };
        client.send(&req).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), req);

        let event = BrokerEvent::Resource(ResourceEvent::InterfaceUp {
            name: "eth0".into(),
            ifindex: 2,
            loopback: false,
        });
        peer.send(&event).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_queued_frames_flush_in_order() {
        let (client_stream, server_stream) = UnixStream::pair().unwrap();
        let mut client = BrokerConnection {
            stream: client_stream,
            tx_queue: Vec::new(),
            rx_buf: BytesMut::new(),
        };
        let mut peer = BrokerPeer::new(server_stream);

        client.queue(&BrokerRequest::NexthopRegister {
            addr: addr("fe80::1"),
        });
        client.queue(&BrokerRequest::NexthopUnregister {
            addr: addr("fe80::1"),
        });
        assert!(client.has_pending());
        client.flush().await.unwrap();
        assert!(!client.has_pending());

        assert!(matches!(
            peer.recv().await.unwrap(),
            BrokerRequest::NexthopRegister { .. }
        ));
        assert!(matches!(
            peer.recv().await.unwrap(),
            BrokerRequest::NexthopUnregister { .. }
        ));
    }

    #[tokio::test]
    async fn test_closed_peer_yields_broker_closed() {
        let (client_stream, server_stream) = UnixStream::pair().unwrap();
        let mut client = BrokerConnection {
            stream: client_stream,
            tx_queue: Vec::new(),
            rx_buf: BytesMut::new(),
        };
        drop(server_stream);

        match client.recv().await {
            Err(Error::BrokerClosed) => {}
            other => panic!("expected BrokerClosed, got {:?}", other),
        }
    }
}
