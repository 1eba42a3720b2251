//! # Transmitter Link (Serial)
//!
//! Byte-stream serial link to an RC transmitter running EdgeTX/OpenTX in
//! USB Serial (VCP) mode.
//!
//! The link is framed as newline-terminated payloads; binary bursts with
//! no newline are flushed as opaque frames once the buffer fills. No
//! handshake is required: the link counts as open once the device opens.

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::{timeout, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::{LinkTransport, ReadOutcome};
use crate::error::{BridgeError, Result};

/// Default device paths to try when none is configured (in order)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC devices (most common)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Flush the buffer as one opaque frame past this size
const MAX_LINE_LEN: usize = 4096;

/// Serial transmitter link
pub struct RemoteLink {
    configured_path: String,
    baud_rate: u32,
    port: Option<tokio_serial::SerialStream>,
    device_path: String,
    buffer: BytesMut,
}

impl std::fmt::Debug for RemoteLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLink")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl RemoteLink {
    /// Create an unopened transmitter link
    ///
    /// # Arguments
    ///
    /// * `path` - Serial device path; empty string means auto-detect
    /// * `baud_rate` - Line speed (8 data bits, no parity, 1 stop bit)
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            configured_path: path.to_string(),
            baud_rate,
            port: None,
            device_path: String::new(),
            buffer: BytesMut::with_capacity(MAX_LINE_LEN),
        }
    }

    /// The device path that was successfully opened
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| BridgeError::Transport(format!("failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

#[async_trait]
impl LinkTransport for RemoteLink {
    async fn open(&mut self) -> Result<()> {
        let candidates: Vec<&str> = if self.configured_path.is_empty() {
            DEFAULT_DEVICE_PATHS.to_vec()
        } else {
            vec![self.configured_path.as_str()]
        };

        for path in &candidates {
            debug!("trying serial port: {}", path);
            match Self::open_port(path, self.baud_rate) {
                Ok(port) => {
                    info!("opened transmitter at {} ({} baud, 8N1)", path, self.baud_rate);
                    self.port = Some(port);
                    self.device_path = path.to_string();
                    self.buffer.clear();
                    return Ok(());
                }
                Err(e) => {
                    warn!("failed to open {}: {}", path, e);
                }
            }
        }

        Err(BridgeError::Transport(format!(
            "no transmitter serial port found (tried: {})", candidates.join(", ")
        )))
    }

    async fn read(&mut self, read_timeout: Duration) -> Result<ReadOutcome> {
        let port = self.port.as_mut()
            .ok_or_else(|| BridgeError::Transport("transmitter link not open".to_string()))?;

        // One deadline for the whole call: partial reads must not extend it
        let deadline = Instant::now() + read_timeout;

        loop {
            if let Some(line) = take_line(&mut self.buffer) {
                return Ok(ReadOutcome::Frame(line));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ReadOutcome::Idle);
            }

            match timeout(remaining, port.read_buf(&mut self.buffer)).await {
                Ok(Ok(0)) => {
                    // EOF on a serial device: it was unplugged
                    self.port = None;
                    return Err(BridgeError::Transport(format!(
                        "transmitter at {} disconnected", self.device_path
                    )));
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    self.port = None;
                    return Err(BridgeError::Transport(format!(
                        "read from {}: {}", self.device_path, e
                    )));
                }
                Err(_) => return Ok(ReadOutcome::Idle),
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) {
        self.port = None;
        self.buffer.clear();
    }
}

/// Take one complete line out of the buffer, without its terminator.
///
/// Oversized buffers with no newline (binary telemetry bursts) are flushed
/// whole so they can still reach the decoder's raw fallback.
fn take_line(buffer: &mut BytesMut) -> Option<Vec<u8>> {
    if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let mut line = buffer.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        return Some(line.to_vec());
    }

    if buffer.len() >= MAX_LINE_LEN {
        return Some(buffer.split().to_vec());
    }

    None
}
