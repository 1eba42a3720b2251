//! # MAVLink Protocol Constants and Types
//!
//! Core protocol definitions for the vehicle telemetry receive path.

/// MAVLink v1 frame start byte
pub const MAV_STX_V1: u8 = 0xFE;

/// MAVLink v2 frame start byte
pub const MAV_STX_V2: u8 = 0xFD;

/// v1 header size: stx(1) + len(1) + seq(1) + sysid(1) + compid(1) + msgid(1)
pub const MAV_HEADER_LEN_V1: usize = 6;

/// v2 header size: stx(1) + len(1) + incompat(1) + compat(1) + seq(1)
/// + sysid(1) + compid(1) + msgid(3)
pub const MAV_HEADER_LEN_V2: usize = 10;

/// Checksum size (X.25, little-endian)
pub const MAV_CHECKSUM_LEN: usize = 2;

/// v2 incompat flag: frame carries a 13-byte signature after the checksum
pub const MAV_INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// v2 signature size
pub const MAV_SIGNATURE_LEN: usize = 13;

/// HEARTBEAT message id
pub const MSG_ID_HEARTBEAT: u32 = 0;

/// GLOBAL_POSITION_INT message id
pub const MSG_ID_GLOBAL_POSITION_INT: u32 = 33;

/// BATTERY_STATUS message id
pub const MSG_ID_BATTERY_STATUS: u32 = 147;

/// HEARTBEAT payload size
pub const HEARTBEAT_PAYLOAD_LEN: usize = 9;

/// GLOBAL_POSITION_INT payload size
pub const GLOBAL_POSITION_INT_PAYLOAD_LEN: usize = 28;

/// BATTERY_STATUS payload size
pub const BATTERY_STATUS_PAYLOAD_LEN: usize = 36;

/// Heading sentinel: the vehicle does not know its heading
pub const HDG_UNKNOWN: u16 = u16::MAX;

/// Battery sentinel: remaining percentage unknown
pub const BATTERY_REMAINING_UNKNOWN: i8 = -1;

/// base_mode flag: motors are armed (MAV_MODE_FLAG_SAFETY_ARMED)
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 0x80;

/// Per-message CRC_EXTRA seed, from the common message set
///
/// Returns `None` for messages the bridge does not decode; their checksums
/// cannot be verified without the full message definitions.
pub fn crc_extra_for(msg_id: u32) -> Option<u8> {
    match msg_id {
        MSG_ID_HEARTBEAT => Some(50),
        MSG_ID_GLOBAL_POSITION_INT => Some(104),
        MSG_ID_BATTERY_STATUS => Some(154),
        _ => None,
    }
}

/// A validated frame, not yet interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub msg_id: u32,
    pub payload: Vec<u8>,
}

/// HEARTBEAT fields the bridge uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatData {
    /// Autopilot-specific mode; low byte selects the flight mode
    pub custom_mode: u32,
    /// Mode flag bits; bit 0x80 means armed
    pub base_mode: u8,
    pub system_status: u8,
}

/// GLOBAL_POSITION_INT fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionData {
    /// Latitude in degrees * 1e7
    pub lat: i32,
    /// Longitude in degrees * 1e7
    pub lon: i32,
    /// Altitude above origin in millimeters
    pub relative_alt: i32,
    /// Ground X speed in cm/s
    pub vx: i16,
    /// Heading in centi-degrees; 65535 when unknown
    pub hdg: u16,
}

/// BATTERY_STATUS fields the bridge uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryData {
    /// Remaining charge percentage [0, 100]; -1 when unknown
    pub battery_remaining: i8,
}

/// One interpreted vehicle message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VehicleMessage {
    Heartbeat(HeartbeatData),
    Position(PositionData),
    Battery(BatteryData),
    /// Structurally valid frame the bridge does not interpret.
    /// Proof the link is alive, nothing more.
    Ignored(u32),
}
