//! # Canonical Telemetry Records
//!
//! Transport-agnostic telemetry shapes submitted to the ingestion API.
//!
//! A record is either vehicle-shaped (position + battery + flight mode) or
//! remote-shaped (transmitter channels + switches + RSSI). The two shapes
//! are never mixed into one payload.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Generate the session identifier for one bridge run.
///
/// Stable for the process lifetime and never reused across runs.
pub fn new_session_id() -> String {
    format!("session_{}", Uuid::now_v7().simple())
}

/// Current UTC instant as ISO-8601 with millisecond precision.
///
/// Timestamps are taken at decode time; device clocks are not trusted.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Vehicle flight modes (ArduPilot plane custom-mode map)
///
/// Unmapped raw codes decode to [`FlightMode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    Manual,
    Circle,
    Stabilize,
    Training,
    Acro,
    FlyByWireA,
    FlyByWireB,
    Cruise,
    Autotune,
    Auto,
    Rtl,
    Loiter,
    Guided,
    Initialising,
    Unknown,
}

impl FlightMode {
    /// Map a heartbeat custom mode to a flight mode.
    ///
    /// Only the low byte is significant; the upper bytes carry
    /// autopilot-specific flags.
    pub fn from_custom_mode(custom_mode: u32) -> Self {
        match custom_mode & 0xFF {
            0 => FlightMode::Manual,
            1 => FlightMode::Circle,
            2 => FlightMode::Stabilize,
            3 => FlightMode::Training,
            4 => FlightMode::Acro,
            5 => FlightMode::FlyByWireA,
            6 => FlightMode::FlyByWireB,
            7 => FlightMode::Cruise,
            8 => FlightMode::Autotune,
            10 => FlightMode::Auto,
            11 => FlightMode::Rtl,
            12 => FlightMode::Loiter,
            15 => FlightMode::Guided,
            16 => FlightMode::Initialising,
            _ => FlightMode::Unknown,
        }
    }
}

/// Vehicle-shaped telemetry record
///
/// Emitted once per position frame, with battery/mode/armed merged in from
/// the decoder's last-known cache. All numeric fields are clamped to their
/// documented ranges at decode time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub session_id: String,
    pub timestamp: String,
    /// Degrees, signed
    pub latitude: f64,
    /// Degrees, signed
    pub longitude: f64,
    /// Meters, relative to origin
    pub altitude: f64,
    /// Meters/second, non-negative; unknown maps to 0
    pub speed: f64,
    /// Degrees [0, 360); the protocol's invalid sentinel maps to `None`
    pub heading: Option<f64>,
    /// Percent [0, 100]; unknown maps to 0
    pub battery: f64,
    #[serde(rename = "flightMode")]
    pub flight_mode: FlightMode,
    pub armed: bool,
}

/// Remote-shaped telemetry record (RC transmitter)
///
/// Structured fields are present for parsed EdgeTX payloads; unparseable
/// payloads carry only their hex representation in `raw_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    pub connected: bool,
    pub timestamp: String,
    /// Ordered channel pulse values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<u16>>,
    /// Ordered switch states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switches: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    /// Hex dump of an opaque payload (fallback when JSON parse fails)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
}

/// Canonical telemetry record, one of the two shapes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryRecord {
    Vehicle(VehicleRecord),
    Remote(RemoteRecord),
}

impl TelemetryRecord {
    /// Shape name for log messages
    pub fn shape(&self) -> &'static str {
        match self {
            TelemetryRecord::Vehicle(_) => "vehicle",
            TelemetryRecord::Remote(_) => "remote",
        }
    }
}
