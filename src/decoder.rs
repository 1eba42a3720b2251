//! # Frame Decoder
//!
//! Normalizes transport-specific frames into canonical telemetry records.
//!
//! Vehicle links: battery and mode/armed state arrive on slower-cadence
//! frames than position. The decoder caches them as last-known values and
//! merges the cache into each position-derived record; a record is only
//! emitted when a position frame arrives.
//!
//! Transmitter links: structured (JSON) parse first, raw hex fallback on
//! failure. Idle ticks produce nothing; liveness is the status side
//! channel's job, not a telemetry record.

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::mav;
use crate::mav::protocol::{VehicleMessage, HDG_UNKNOWN, MAV_MODE_FLAG_SAFETY_ARMED};
use crate::record::{utc_timestamp, FlightMode, RemoteRecord, TelemetryRecord, VehicleRecord};

/// One decode attempt's result
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A canonical record ready for submission
    Record(TelemetryRecord),
    /// The frame updated cached state but produces no record of its own
    Partial,
    /// Valid but uninteresting traffic
    Empty,
}

/// Decoder for MAVLink vehicle frames
///
/// Owns the last-known battery/mode/armed cache; `session_id` is fixed at
/// construction and stamped into every record.
#[derive(Debug)]
pub struct VehicleDecoder {
    session_id: String,
    battery: f64,
    flight_mode: FlightMode,
    armed: bool,
}

impl VehicleDecoder {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            battery: 0.0,
            flight_mode: FlightMode::Unknown,
            armed: false,
        }
    }

    /// Decode one raw frame
    ///
    /// # Errors
    ///
    /// Returns a decode error for garbled frames. The caller counts these
    /// toward the consecutive-error budget; they are never fatal.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Decoded> {
        match mav::decoder::decode(frame)? {
            VehicleMessage::Heartbeat(hb) => {
                self.flight_mode = FlightMode::from_custom_mode(hb.custom_mode);
                self.armed = hb.base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0;
                Ok(Decoded::Partial)
            }
            VehicleMessage::Battery(batt) => {
                // -1 means unknown; the canonical range is [0, 100]
                self.battery = f64::from(batt.battery_remaining).clamp(0.0, 100.0);
                Ok(Decoded::Partial)
            }
            VehicleMessage::Position(pos) => {
                let record = VehicleRecord {
                    session_id: self.session_id.clone(),
                    timestamp: utc_timestamp(),
                    latitude: f64::from(pos.lat) / 1e7,
                    longitude: f64::from(pos.lon) / 1e7,
                    altitude: f64::from(pos.relative_alt) / 1000.0,
                    speed: (f64::from(pos.vx) / 100.0).max(0.0),
                    heading: decode_heading(pos.hdg),
                    battery: self.battery,
                    flight_mode: self.flight_mode,
                    armed: self.armed,
                };
                Ok(Decoded::Record(TelemetryRecord::Vehicle(record)))
            }
            VehicleMessage::Ignored(id) => {
                debug!("ignoring message id {}", id);
                Ok(Decoded::Empty)
            }
        }
    }
}

/// Centi-degrees to degrees [0, 360); the sentinel maps to absent, never 0
fn decode_heading(hdg: u16) -> Option<f64> {
    if hdg == HDG_UNKNOWN {
        None
    } else {
        Some((f64::from(hdg) / 100.0).rem_euclid(360.0))
    }
}

/// Structured transmitter payload (EdgeTX JSON)
#[derive(Debug, Deserialize)]
struct EdgeTxPayload {
    #[serde(default)]
    channels: Vec<u16>,
    #[serde(default)]
    switches: Vec<u8>,
    #[serde(default)]
    battery: Option<f64>,
    #[serde(default)]
    rssi: Option<i32>,
}

/// Decoder for transmitter serial frames
#[derive(Debug, Default)]
pub struct RemoteDecoder;

impl RemoteDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one line from the transmitter.
    ///
    /// JSON objects become structured records; anything else is exposed as
    /// an opaque hex payload with a `connected` flag. Empty lines decode to
    /// nothing.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Decoded> {
        if frame.is_empty() {
            return Ok(Decoded::Empty);
        }

        let record = match serde_json::from_slice::<EdgeTxPayload>(frame) {
            Ok(payload) => RemoteRecord {
                connected: true,
                timestamp: utc_timestamp(),
                channels: Some(payload.channels),
                switches: Some(payload.switches),
                battery: payload.battery.map(|b| b.clamp(0.0, 100.0)),
                rssi: payload.rssi,
                raw_data: None,
            },
            Err(_) => {
                debug!("non-JSON transmitter payload ({} bytes), keeping raw", frame.len());
                RemoteRecord {
                    connected: true,
                    timestamp: utc_timestamp(),
                    channels: None,
                    switches: None,
                    battery: None,
                    rssi: None,
                    raw_data: Some(hex::encode(frame)),
                }
            }
        };

        Ok(Decoded::Record(TelemetryRecord::Remote(record)))
    }
}
