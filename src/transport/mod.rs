//! # Link Transport Module
//!
//! Ownership of the physical/virtual device channel.
//!
//! This module handles:
//! - The [`LinkTransport`] contract shared by all link kinds
//! - Vehicle links: MAVLink packets over a UDP endpoint
//! - Transmitter links: byte-stream serial at 8N1
//!
//! Transports surface raw frames only; interpreting them is the frame
//! decoder's job, and connection policy lives in the supervisor.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub mod remote;
pub mod vehicle;

pub use remote::RemoteLink;
pub use vehicle::VehicleLink;

/// One read attempt's result when the transport itself is healthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A raw transport-level frame (packet or line)
    Frame(Vec<u8>),
    /// No data arrived within the timeout
    Idle,
}

/// Contract for a device link
///
/// `read` never blocks past its timeout. Unrecoverable transport errors
/// (device unplugged, socket gone) are returned as errors, distinct from
/// [`ReadOutcome::Idle`].
#[async_trait]
pub trait LinkTransport: Send {
    /// Open the channel; blocks until the link is usable or fails
    async fn open(&mut self) -> Result<()>;

    /// Read the next frame, waiting at most `timeout`
    async fn read(&mut self, timeout: Duration) -> Result<ReadOutcome>;

    /// Whether the underlying channel is currently open
    fn is_open(&self) -> bool;

    /// Release the underlying channel
    async fn close(&mut self);
}

#[async_trait]
impl LinkTransport for Box<dyn LinkTransport> {
    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        (**self).read(timeout).await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}
