//! # Field Bridge Library
//!
//! Forward live telemetry from a field device to a remote ingestion API.
//!
//! This library provides the core functionality for attaching to a vehicle
//! (MAVLink over UDP) or RC transmitter (serial) link, decoding its frames
//! into canonical telemetry records, and delivering them over HTTP with
//! rate limiting and connection supervision.

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod mav;
pub mod record;
pub mod supervisor;
pub mod transport;
