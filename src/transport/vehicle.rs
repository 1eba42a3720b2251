//! # Vehicle Link (UDP)
//!
//! MAVLink telemetry endpoint, e.g. a flight controller or SITL instance
//! streaming to `udp:127.0.0.1:14550`.
//!
//! `open` binds the endpoint and then waits for a HEARTBEAT frame before
//! reporting success, so a bound-but-silent port never counts as connected.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use super::{LinkTransport, ReadOutcome};
use crate::error::{BridgeError, Result};
use crate::mav::decoder::decode;
use crate::mav::protocol::*;

/// Largest datagram the link will accept
const MAX_DATAGRAM_SIZE: usize = 2048;

/// MAVLink-over-UDP vehicle link
pub struct VehicleLink {
    endpoint: String,
    connect_timeout: Duration,
    socket: Option<UdpSocket>,
    /// Frames split out of the last datagram, handed out one per read
    queued: std::collections::VecDeque<Vec<u8>>,
}

impl std::fmt::Debug for VehicleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleLink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl VehicleLink {
    /// Create an unopened vehicle link
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Listen endpoint, `udp:<host>:<port>`
    /// * `connect_timeout` - How long `open` waits for the first heartbeat
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            connect_timeout,
            socket: None,
            queued: std::collections::VecDeque::new(),
        }
    }

    /// Bind the UDP socket without waiting for traffic
    pub async fn bind(&mut self) -> Result<()> {
        let addr = parse_endpoint(&self.endpoint)?;
        let socket = UdpSocket::bind(&addr).await
            .map_err(|e| BridgeError::Transport(format!("failed to bind {}: {}", addr, e)))?;
        debug!("bound vehicle endpoint {}", addr);
        self.socket = Some(socket);
        Ok(())
    }

    /// Local address of the bound socket
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        let socket = self.socket.as_ref()
            .ok_or_else(|| BridgeError::Transport("vehicle link not open".to_string()))?;
        socket.local_addr()
            .map_err(|e| BridgeError::Transport(format!("local_addr: {}", e)))
    }

    /// Wait until a valid HEARTBEAT frame is observed or the connect
    /// timeout elapses.
    pub async fn wait_heartbeat(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BridgeError::Transport(format!(
                    "no heartbeat on {} within {:?}", self.endpoint, self.connect_timeout
                )));
            }

            match self.read(remaining).await? {
                ReadOutcome::Frame(frame) => {
                    if matches!(decode(&frame), Ok(VehicleMessage::Heartbeat(_))) {
                        info!("heartbeat received on {}", self.endpoint);
                        return Ok(());
                    }
                    // Other traffic before the first heartbeat is normal
                }
                ReadOutcome::Idle => {}
            }
        }
    }

    async fn recv_datagram(&mut self, wait: Duration) -> Result<ReadOutcome> {
        let socket = self.socket.as_mut()
            .ok_or_else(|| BridgeError::Transport("vehicle link not open".to_string()))?;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match timeout(wait, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                let mut frames = split_frames(&buf[..len]);
                match frames.pop_front() {
                    Some(first) => {
                        self.queued.extend(frames);
                        Ok(ReadOutcome::Frame(first))
                    }
                    None => Ok(ReadOutcome::Idle),
                }
            }
            Ok(Err(e)) => Err(BridgeError::Transport(format!("recv on {}: {}", self.endpoint, e))),
            Err(_) => Ok(ReadOutcome::Idle),
        }
    }
}

#[async_trait]
impl LinkTransport for VehicleLink {
    async fn open(&mut self) -> Result<()> {
        self.bind().await?;
        match self.wait_heartbeat().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.socket = None;
                Err(e)
            }
        }
    }

    async fn read(&mut self, read_timeout: Duration) -> Result<ReadOutcome> {
        if let Some(frame) = self.queued.pop_front() {
            return Ok(ReadOutcome::Frame(frame));
        }
        self.recv_datagram(read_timeout).await
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn close(&mut self) {
        self.socket = None;
        self.queued.clear();
    }
}

/// Parse `udp:<host>:<port>` into a bindable address
fn parse_endpoint(endpoint: &str) -> Result<String> {
    let rest = endpoint.strip_prefix("udp:")
        .ok_or_else(|| BridgeError::Transport(format!(
            "unsupported endpoint '{}': expected udp:<host>:<port>", endpoint
        )))?;

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(rest.to_string())
        }
        _ => Err(BridgeError::Transport(format!(
            "unsupported endpoint '{}': expected udp:<host>:<port>", endpoint
        ))),
    }
}

/// Split a datagram into whole MAVLink frames.
///
/// Frame length is derived from the header, so multiple packets per
/// datagram are handled; bytes that are not a start-of-frame are skipped
/// one at a time to resynchronize.
fn split_frames(data: &[u8]) -> std::collections::VecDeque<Vec<u8>> {
    let mut frames = std::collections::VecDeque::new();
    let mut pos = 0;

    while pos < data.len() {
        let remaining = &data[pos..];
        let total = match remaining[0] {
            MAV_STX_V2 if remaining.len() >= 3 => {
                let mut total = MAV_HEADER_LEN_V2 + remaining[1] as usize + MAV_CHECKSUM_LEN;
                if remaining[2] & MAV_INCOMPAT_FLAG_SIGNED != 0 {
                    total += MAV_SIGNATURE_LEN;
                }
                Some(total)
            }
            MAV_STX_V1 if remaining.len() >= 2 => {
                Some(MAV_HEADER_LEN_V1 + remaining[1] as usize + MAV_CHECKSUM_LEN)
            }
            _ => None,
        };

        match total {
            Some(total) if remaining.len() >= total => {
                frames.push_back(remaining[..total].to_vec());
                pos += total;
            }
            _ => {
                pos += 1;
            }
        }
    }

    frames
}
