//! # Field Bridge
//!
//! Forward live telemetry from a field device to a remote ingestion API.
//!
//! This application attaches to a vehicle (MAVLink over UDP) or RC
//! transmitter (serial) link, decodes its frames into canonical telemetry
//! records, and delivers them over HTTP with rate limiting and connection
//! supervision.

use anyhow::{Context, Result};
use tracing::info;

use field_bridge::bridge::{BridgeLoop, FrameDecoder};
use field_bridge::config::{Config, LinkKind};
use field_bridge::decoder::{RemoteDecoder, VehicleDecoder};
use field_bridge::delivery::{DeliveryPipeline, HttpIngestApi};
use field_bridge::record::new_session_id;
use field_bridge::supervisor::ConnectionSupervisor;
use field_bridge::transport::{LinkTransport, RemoteLink, VehicleLink};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for the bridge
///
/// Loads configuration, attaches to the configured device link, and runs
/// the bridge loop until Ctrl+C.
///
/// # Errors
///
/// Returns error if:
/// - Configuration cannot be loaded or fails validation
/// - The ingestion API rejects the configured credential
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Field Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let transport: Box<dyn LinkTransport> = match config.link.kind {
        LinkKind::Vehicle => {
            info!("vehicle link at {}", config.link.endpoint);
            Box::new(VehicleLink::new(&config.link.endpoint, config.connect_timeout()))
        }
        LinkKind::Transmitter => {
            info!(
                "transmitter link at {} ({} baud)",
                if config.link.serial_port.is_empty() { "auto" } else { &config.link.serial_port },
                config.link.baud_rate
            );
            Box::new(RemoteLink::new(&config.link.serial_port, config.link.baud_rate))
        }
    };

    let decoder = match config.link.kind {
        LinkKind::Vehicle => {
            let session_id = new_session_id();
            info!("session id: {}", session_id);
            FrameDecoder::Vehicle(VehicleDecoder::new(session_id))
        }
        LinkKind::Transmitter => FrameDecoder::Remote(RemoteDecoder::new()),
    };

    let api = HttpIngestApi::new(&config.api, config.request_timeout());
    let pipeline = DeliveryPipeline::new(api, config.min_submit_interval());
    let supervisor = ConnectionSupervisor::new(
        config.bridge.degraded_after,
        config.bridge.disconnected_after,
        config.reconnect_wait(),
    );

    let bridge = BridgeLoop::new(
        transport,
        decoder,
        supervisor,
        pipeline,
        config.tick_period(),
        config.read_timeout(),
    );

    info!("Press Ctrl+C to exit");
    bridge
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Field Bridge stopped");
    Ok(())
}
