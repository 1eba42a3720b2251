//! # MAVLink Protocol Module
//!
//! Minimal MAVLink v1/v2 receive path for the vehicle telemetry link.
//!
//! This module handles:
//! - Frame synchronization and validation (v1 `0xFE`, v2 `0xFD`)
//! - X.25 (CRC-16/MCRF4XX) checksum with per-message CRC_EXTRA
//! - Decoding the messages the bridge cares about: HEARTBEAT,
//!   GLOBAL_POSITION_INT and BATTERY_STATUS
//!
//! The bridge never transmits on the vehicle link, so there is no encoder
//! outside of test helpers.

pub mod crc;
pub mod decoder;
pub mod protocol;
