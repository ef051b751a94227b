//! Event channel link: transport, heartbeat and reconnect scheduling.
//!
//! # Architecture
//!
//! ```text
//!   ReconnectScheduler ──effects──► Synchronizer ──connect/send──► Transport
//!          ▲                             │                           │
//!          │ open/close/retry            │ tick                      │ dial
//!          └──────── TransportEvent ◄────┼──────── link task ◄───────┘
//!                                        ▼
//!                                    Heartbeat
//! ```
//!
//! The [`Dialer`] trait is the seam to the wire: [`WsDialer`] performs a
//! WebSocket handshake, tests substitute in-memory dialers. A dial produces
//! a [`FrameSink`] and a [`FrameSource`] that the transport's link task
//! pumps until the connection ends.

pub mod heartbeat;
pub mod reconnect;
pub mod transport;

use anyhow::Result;
use async_trait::async_trait;

use crate::ws::{self, WsMessage, WsReader, WsWriter};

pub use heartbeat::Heartbeat;
pub use reconnect::{Effect, LinkState, ReconnectScheduler};
pub use transport::{Transport, TransportEvent};

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Answer a ping.
    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `None` once the connection has ended.
    async fn recv(&mut self) -> Option<Result<WsMessage>>;
}

/// Establishes one duplex connection to an address.
#[async_trait]
pub trait Dialer: Send + Sync + std::fmt::Debug {
    /// Connect to `address` and return its halves.
    async fn dial(&self, address: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

/// Production dialer speaking WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, address: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let (writer, reader) = ws::connect(address).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        WsWriter::send_text(self, text).await
    }

    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        WsWriter::send_pong(self, data).await
    }

    async fn close(&mut self) -> Result<()> {
        WsWriter::close(self).await
    }
}

#[async_trait]
impl FrameSource for WsReader {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        WsReader::recv(self).await
    }
}
