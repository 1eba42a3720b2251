//! # MAVLink Frame Decoder
//!
//! Validates raw frames and decodes the messages the bridge interprets
//! (HEARTBEAT, GLOBAL_POSITION_INT, BATTERY_STATUS).

use bytes::Buf;

use super::crc::crc16_mcrf4xx_accumulate;
use super::protocol::*;
use crate::error::{BridgeError, Result};

/// Parse and validate one complete MAVLink frame (v1 or v2)
///
/// # Arguments
///
/// * `frame` - Complete frame bytes starting at the STX byte
///
/// # Errors
///
/// Returns error if:
/// - Frame is empty or truncated
/// - Start byte is not a MAVLink STX
/// - Checksum verification fails (known message ids only)
pub fn parse_frame(frame: &[u8]) -> Result<RawFrame> {
    match frame.first() {
        Some(&MAV_STX_V2) => parse_frame_v2(frame),
        Some(&MAV_STX_V1) => parse_frame_v1(frame),
        Some(&other) => Err(BridgeError::Decode(
            format!("invalid start byte: 0x{:02X}", other)
        )),
        None => Err(BridgeError::Decode("empty frame".to_string())),
    }
}

fn parse_frame_v2(frame: &[u8]) -> Result<RawFrame> {
    if frame.len() < MAV_HEADER_LEN_V2 + MAV_CHECKSUM_LEN {
        return Err(BridgeError::Decode(
            format!("v2 frame too short: {} bytes", frame.len())
        ));
    }

    let payload_len = frame[1] as usize;
    let signed = frame[2] & MAV_INCOMPAT_FLAG_SIGNED != 0;
    let mut expected = MAV_HEADER_LEN_V2 + payload_len + MAV_CHECKSUM_LEN;
    if signed {
        expected += MAV_SIGNATURE_LEN;
    }

    if frame.len() < expected {
        return Err(BridgeError::Decode(
            format!("v2 frame too short: expected {} bytes, got {}", expected, frame.len())
        ));
    }

    let msg_id = u32::from_le_bytes([frame[7], frame[8], frame[9], 0]);
    let crc_start = MAV_HEADER_LEN_V2 + payload_len;
    let received_crc = u16::from_le_bytes([frame[crc_start], frame[crc_start + 1]]);

    verify_checksum(msg_id, &frame[1..crc_start], received_crc)?;

    Ok(RawFrame {
        msg_id,
        payload: frame[MAV_HEADER_LEN_V2..crc_start].to_vec(),
    })
}

fn parse_frame_v1(frame: &[u8]) -> Result<RawFrame> {
    if frame.len() < MAV_HEADER_LEN_V1 + MAV_CHECKSUM_LEN {
        return Err(BridgeError::Decode(
            format!("v1 frame too short: {} bytes", frame.len())
        ));
    }

    let payload_len = frame[1] as usize;
    let expected = MAV_HEADER_LEN_V1 + payload_len + MAV_CHECKSUM_LEN;
    if frame.len() < expected {
        return Err(BridgeError::Decode(
            format!("v1 frame too short: expected {} bytes, got {}", expected, frame.len())
        ));
    }

    let msg_id = frame[5] as u32;
    let crc_start = MAV_HEADER_LEN_V1 + payload_len;
    let received_crc = u16::from_le_bytes([frame[crc_start], frame[crc_start + 1]]);

    verify_checksum(msg_id, &frame[1..crc_start], received_crc)?;

    Ok(RawFrame {
        msg_id,
        payload: frame[MAV_HEADER_LEN_V1..crc_start].to_vec(),
    })
}

/// Verify the X.25 checksum over header + payload plus the CRC_EXTRA byte.
///
/// Messages the bridge does not interpret have no known CRC_EXTRA; their
/// checksums are left unverified and the frame passes on structure alone.
fn verify_checksum(msg_id: u32, data: &[u8], received: u16) -> Result<()> {
    let Some(extra) = crc_extra_for(msg_id) else {
        return Ok(());
    };

    let crc = crc16_mcrf4xx_accumulate(crc16_mcrf4xx_accumulate(0xFFFF, data), &[extra]);
    if crc != received {
        return Err(BridgeError::Decode(
            format!("checksum mismatch for msg {}: expected 0x{:04X}, got 0x{:04X}", msg_id, crc, received)
        ));
    }
    Ok(())
}

/// Interpret a validated frame
///
/// Message ids outside the supported set decode to
/// [`VehicleMessage::Ignored`]; the payload is not inspected.
pub fn decode_message(raw: &RawFrame) -> Result<VehicleMessage> {
    match raw.msg_id {
        MSG_ID_HEARTBEAT => decode_heartbeat(&raw.payload),
        MSG_ID_GLOBAL_POSITION_INT => decode_position(&raw.payload),
        MSG_ID_BATTERY_STATUS => decode_battery(&raw.payload),
        other => Ok(VehicleMessage::Ignored(other)),
    }
}

/// Parse and interpret one frame in a single step
pub fn decode(frame: &[u8]) -> Result<VehicleMessage> {
    decode_message(&parse_frame(frame)?)
}

/// Restore a v2 payload to its full length.
///
/// MAVLink v2 truncates trailing zero bytes on the wire; decoding assumes
/// the declared field layout, so missing bytes read back as zero.
fn padded(payload: &[u8], full_len: usize, msg: &str) -> Result<Vec<u8>> {
    if payload.len() > full_len {
        return Err(BridgeError::Decode(
            format!("{} payload too long: {} bytes", msg, payload.len())
        ));
    }
    let mut buf = payload.to_vec();
    buf.resize(full_len, 0);
    Ok(buf)
}

fn decode_heartbeat(payload: &[u8]) -> Result<VehicleMessage> {
    let buf = padded(payload, HEARTBEAT_PAYLOAD_LEN, "HEARTBEAT")?;
    let mut buf = &buf[..];

    let custom_mode = buf.get_u32_le();
    let _mav_type = buf.get_u8();
    let _autopilot = buf.get_u8();
    let base_mode = buf.get_u8();
    let system_status = buf.get_u8();

    Ok(VehicleMessage::Heartbeat(HeartbeatData {
        custom_mode,
        base_mode,
        system_status,
    }))
}

fn decode_position(payload: &[u8]) -> Result<VehicleMessage> {
    let buf = padded(payload, GLOBAL_POSITION_INT_PAYLOAD_LEN, "GLOBAL_POSITION_INT")?;
    let mut buf = &buf[..];

    let _time_boot_ms = buf.get_u32_le();
    let lat = buf.get_i32_le();
    let lon = buf.get_i32_le();
    let _alt = buf.get_i32_le();
    let relative_alt = buf.get_i32_le();
    let vx = buf.get_i16_le();
    let _vy = buf.get_i16_le();
    let _vz = buf.get_i16_le();
    let hdg = buf.get_u16_le();

    Ok(VehicleMessage::Position(PositionData {
        lat,
        lon,
        relative_alt,
        vx,
        hdg,
    }))
}

fn decode_battery(payload: &[u8]) -> Result<VehicleMessage> {
    let buf = padded(payload, BATTERY_STATUS_PAYLOAD_LEN, "BATTERY_STATUS")?;

    // battery_remaining is the last field of the wire layout
    let battery_remaining = buf[BATTERY_STATUS_PAYLOAD_LEN - 1] as i8;

    Ok(VehicleMessage::Battery(BatteryData { battery_remaining }))
}
