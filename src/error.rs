//! # Error Types
//!
//! Custom error types for Field Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Field Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Device link errors (endpoint unavailable, device unplugged, read failure)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognized frames
    #[error("frame decode error: {0}")]
    Decode(String),

    /// Delivery-side errors (network, HTTP); retryable
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Credential rejected by the ingestion API (401); fatal, non-retryable
    #[error("API credential rejected (401); check the configured token")]
    Unauthorized,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Field Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
