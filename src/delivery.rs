//! # Delivery Pipeline
//!
//! Rate-limited, retrying submission of telemetry records to the remote
//! ingestion API, honoring server backpressure.
//!
//! This module handles:
//! - `POST /telemetry` for vehicle records, `PATCH /remotes/{id}/metadata`
//!   for transmitter records
//! - Client-side token bucket of size 1 (minimum inter-submission interval)
//! - 429 `Retry-After` suspension with a last-value-wins pending slot
//! - The connection-status side channel, at most once per state transition
//!
//! HTTP failures here never touch the Connection Supervisor: it tracks the
//! device link, not the delivery link.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::ApiConfig;
use crate::error::{BridgeError, Result};
use crate::record::TelemetryRecord;

/// Fallback suspension when a 429 carries no usable Retry-After
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Result of one submission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the collaborator
    Delivered,
    /// 429; suspend submissions for the given duration
    RateLimited(Duration),
    /// Other 4xx/5xx; not retryable within the same tick
    Rejected(u16),
    /// Network-layer failure (timeout, refused); a skipped tick
    TransportFailure,
}

/// Device link status reported on the side channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
        }
    }
}

/// The remote ingestion collaborator, as the pipeline sees it
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// `POST /telemetry`; success is 201
    async fn post_telemetry(&self, record: TelemetryRecord) -> Result<SubmitOutcome>;

    /// `PATCH /remotes/{id}/metadata`
    async fn patch_metadata(&self, record: TelemetryRecord) -> Result<SubmitOutcome>;

    /// `PATCH /remotes/{id}/status`; fire-and-forget
    async fn patch_status(&self, status: LinkStatus) -> Result<SubmitOutcome>;
}

enum HttpReply {
    Status(u16, Option<u64>),
    Network(String),
}

/// `ureq`-backed ingestion client
///
/// Blocking calls run on the blocking pool; the agent's global timeout
/// bounds every request, so a stalled network call never stalls the bridge
/// loop past that bound.
pub struct HttpIngestApi {
    agent: ureq::Agent,
    base: String,
    token: String,
    remote_id: Option<String>,
}

impl HttpIngestApi {
    pub fn new(config: &ApiConfig, request_timeout: Duration) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(request_timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            base: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.api_prefix
            ),
            token: config.token.clone(),
            remote_id: config.remote_id.clone(),
        }
    }

    async fn send(&self, patch: bool, url: String, body: serde_json::Value) -> Result<SubmitOutcome> {
        let agent = self.agent.clone();
        let bearer = format!("Bearer {}", self.token);

        let reply = tokio::task::spawn_blocking(move || {
            let request = if patch { agent.patch(&url) } else { agent.post(&url) };
            match request.header("Authorization", &bearer).send_json(&body) {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| value.trim().parse::<u64>().ok());
                    HttpReply::Status(status, retry_after)
                }
                Err(e) => HttpReply::Network(e.to_string()),
            }
        })
        .await
        .map_err(|e| BridgeError::Delivery(format!("request task failed: {}", e)))?;

        match reply {
            HttpReply::Status(status, retry_after) => classify_status(status, retry_after),
            HttpReply::Network(e) => {
                debug!("network failure: {}", e);
                Ok(SubmitOutcome::TransportFailure)
            }
        }
    }
}

/// Map an HTTP status to a submission outcome. 401 is fatal.
fn classify_status(status: u16, retry_after: Option<u64>) -> Result<SubmitOutcome> {
    match status {
        200..=299 => Ok(SubmitOutcome::Delivered),
        401 => Err(BridgeError::Unauthorized),
        429 => Ok(SubmitOutcome::RateLimited(
            retry_after.map_or(DEFAULT_RETRY_AFTER, Duration::from_secs),
        )),
        other => Ok(SubmitOutcome::Rejected(other)),
    }
}

#[async_trait]
impl IngestApi for HttpIngestApi {
    async fn post_telemetry(&self, record: TelemetryRecord) -> Result<SubmitOutcome> {
        let url = format!("{}/telemetry", self.base);
        self.send(false, url, serde_json::to_value(&record).map_err(to_delivery_error)?)
            .await
    }

    async fn patch_metadata(&self, record: TelemetryRecord) -> Result<SubmitOutcome> {
        let Some(remote_id) = &self.remote_id else {
            debug!("no remote_id configured, skipping metadata update");
            return Ok(SubmitOutcome::Delivered);
        };
        let url = format!("{}/remotes/{}/metadata", self.base, remote_id);
        let body = json!({ "metadata": record });
        self.send(true, url, body).await
    }

    async fn patch_status(&self, status: LinkStatus) -> Result<SubmitOutcome> {
        let Some(remote_id) = &self.remote_id else {
            debug!("no remote_id configured, skipping status update");
            return Ok(SubmitOutcome::Delivered);
        };
        let url = format!("{}/remotes/{}/status", self.base, remote_id);
        let body = json!({ "status": status.as_str() });
        self.send(true, url, body).await
    }
}

fn to_delivery_error(e: serde_json::Error) -> BridgeError {
    BridgeError::Delivery(format!("serialize record: {}", e))
}

/// Rate-limited submission state for one bridge instance
pub struct DeliveryPipeline<A> {
    api: A,
    min_interval: Duration,
    last_submit: Option<Instant>,
    suspended_until: Option<Instant>,
    /// Last-value-wins slot; intermediate records are discarded because the
    /// collaborator only needs current state, not history
    pending: Option<TelemetryRecord>,
    last_status: Option<LinkStatus>,
}

impl<A: IngestApi> DeliveryPipeline<A> {
    pub fn new(api: A, min_interval: Duration) -> Self {
        Self {
            api,
            min_interval,
            last_submit: None,
            suspended_until: None,
            pending: None,
            last_status: None,
        }
    }

    /// Queue a record for submission, replacing any unsent one
    pub fn offer(&mut self, record: TelemetryRecord) {
        if self.pending.is_some() {
            debug!("replacing unsent {} record (last-value-wins)", record.shape());
        }
        self.pending = Some(record);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Submit the pending record if the token bucket and any rate-limit
    /// suspension allow it.
    ///
    /// # Errors
    ///
    /// Only credential rejection propagates; every other failure is logged
    /// and absorbed.
    pub async fn pump(&mut self, now: Instant) -> Result<()> {
        if let Some(until) = self.suspended_until {
            if now < until {
                return Ok(());
            }
            self.suspended_until = None;
        }

        if let Some(last) = self.last_submit {
            if now.duration_since(last) < self.min_interval {
                return Ok(());
            }
        }

        let Some(record) = self.pending.take() else {
            return Ok(());
        };
        self.last_submit = Some(now);

        let outcome = match &record {
            TelemetryRecord::Vehicle(_) => self.api.post_telemetry(record.clone()).await?,
            TelemetryRecord::Remote(_) => self.api.patch_metadata(record.clone()).await?,
        };

        match outcome {
            SubmitOutcome::Delivered => {
                debug!("delivered {} record", record.shape());
            }
            SubmitOutcome::RateLimited(retry_after) => {
                warn!("rate limited, suspending submissions for {:?}", retry_after);
                self.suspended_until = Some(now + retry_after);
                // Keep the record for when the window reopens
                if self.pending.is_none() {
                    self.pending = Some(record);
                }
            }
            SubmitOutcome::Rejected(status) => {
                warn!("record rejected with HTTP {}, dropping", status);
            }
            SubmitOutcome::TransportFailure => {
                warn!("delivery transport failure, skipping tick");
            }
        }

        Ok(())
    }

    /// Report a device link status change, at most once per transition.
    ///
    /// Best-effort: outcomes other than credential rejection are ignored.
    pub async fn notify_status(&mut self, status: LinkStatus) -> Result<()> {
        if self.last_status == Some(status) {
            return Ok(());
        }
        self.last_status = Some(status);

        match self.api.patch_status(status).await {
            Ok(_) => Ok(()),
            Err(BridgeError::Unauthorized) => Err(BridgeError::Unauthorized),
            Err(e) => {
                debug!("status notification failed: {}", e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RemoteRecord, VehicleRecord};

    fn vehicle_record(lat: f64) -> TelemetryRecord {
        TelemetryRecord::Vehicle(VehicleRecord {
            session_id: "session_test".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            latitude: lat,
            longitude: 0.0,
            altitude: 0.0,
            speed: 0.0,
            heading: None,
            battery: 50.0,
            flight_mode: crate::record::FlightMode::Manual,
            armed: false,
        })
    }

    fn remote_record() -> TelemetryRecord {
        TelemetryRecord::Remote(RemoteRecord {
            connected: true,
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            channels: Some(vec![1500; 4]),
            switches: Some(vec![0, 1]),
            battery: None,
            rssi: Some(-50),
            raw_data: None,
        })
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(201, None).unwrap(), SubmitOutcome::Delivered);
        assert_eq!(classify_status(200, None).unwrap(), SubmitOutcome::Delivered);
        assert_eq!(
            classify_status(429, Some(7)).unwrap(),
            SubmitOutcome::RateLimited(Duration::from_secs(7))
        );
        assert_eq!(
            classify_status(429, None).unwrap(),
            SubmitOutcome::RateLimited(DEFAULT_RETRY_AFTER)
        );
        assert_eq!(classify_status(500, None).unwrap(), SubmitOutcome::Rejected(500));
        assert!(matches!(classify_status(401, None), Err(BridgeError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_vehicle_records_go_to_telemetry_endpoint() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry()
            .times(1)
            .returning(|_| Ok(SubmitOutcome::Delivered));
        api.expect_patch_metadata().times(0);

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        pipeline.offer(vehicle_record(1.0));
        pipeline.pump(Instant::now()).await.unwrap();
        assert!(!pipeline.has_pending());
    }

    #[tokio::test]
    async fn test_remote_records_go_to_metadata_endpoint() {
        let mut api = MockIngestApi::new();
        api.expect_patch_metadata()
            .times(1)
            .returning(|_| Ok(SubmitOutcome::Delivered));
        api.expect_post_telemetry().times(0);

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        pipeline.offer(remote_record());
        pipeline.pump(Instant::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_min_interval_is_enforced() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry()
            .times(2)
            .returning(|_| Ok(SubmitOutcome::Delivered));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        let t0 = Instant::now();

        pipeline.offer(vehicle_record(1.0));
        pipeline.pump(t0).await.unwrap();

        // Records produced faster than the interval are held back
        pipeline.offer(vehicle_record(2.0));
        pipeline.pump(t0 + Duration::from_millis(300)).await.unwrap();
        assert!(pipeline.has_pending());
        pipeline.pump(t0 + Duration::from_millis(900)).await.unwrap();
        assert!(pipeline.has_pending());

        pipeline.pump(t0 + Duration::from_secs(1)).await.unwrap();
        assert!(!pipeline.has_pending());
    }

    #[tokio::test]
    async fn test_last_value_wins_while_held_back() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry()
            .times(2)
            .withf(|record| {
                // Only the first and the newest record are ever submitted
                matches!(record, TelemetryRecord::Vehicle(v) if v.latitude == 1.0 || v.latitude == 4.0)
            })
            .returning(|_| Ok(SubmitOutcome::Delivered));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        let t0 = Instant::now();

        pipeline.offer(vehicle_record(1.0));
        pipeline.pump(t0).await.unwrap();

        for (i, lat) in [2.0, 3.0, 4.0].iter().enumerate() {
            pipeline.offer(vehicle_record(*lat));
            pipeline.pump(t0 + Duration::from_millis(100 * (i as u64 + 1))).await.unwrap();
        }

        pipeline.pump(t0 + Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_suspends_submissions() {
        let mut api = MockIngestApi::new();
        let mut call = 0;
        api.expect_post_telemetry()
            .times(2)
            .returning(move |_| {
                call += 1;
                if call == 1 {
                    Ok(SubmitOutcome::RateLimited(Duration::from_secs(5)))
                } else {
                    Ok(SubmitOutcome::Delivered)
                }
            });

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        let t0 = Instant::now();

        pipeline.offer(vehicle_record(1.0));
        pipeline.pump(t0).await.unwrap();
        // The rate-limited record is retained for the reopened window
        assert!(pipeline.has_pending());

        // Suspended: nothing goes out, even past the min interval
        pipeline.pump(t0 + Duration::from_secs(2)).await.unwrap();
        pipeline.pump(t0 + Duration::from_millis(4_900)).await.unwrap();
        assert!(pipeline.has_pending());

        pipeline.pump(t0 + Duration::from_secs(5)).await.unwrap();
        assert!(!pipeline.has_pending());
    }

    #[tokio::test]
    async fn test_pump_with_nothing_pending_is_a_no_op() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry().times(0);
        api.expect_patch_metadata().times(0);

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        let t0 = Instant::now();

        pipeline.pump(t0).await.unwrap();
        pipeline.pump(t0 + Duration::from_secs(5)).await.unwrap();
        assert!(!pipeline.has_pending());
    }

    #[tokio::test]
    async fn test_rejected_record_is_dropped() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry()
            .times(1)
            .returning(|_| Ok(SubmitOutcome::Rejected(422)));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        let t0 = Instant::now();

        pipeline.offer(vehicle_record(1.0));
        pipeline.pump(t0).await.unwrap();
        assert!(!pipeline.has_pending());

        // Nothing left to resubmit
        pipeline.pump(t0 + Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_a_skipped_tick() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry()
            .times(1)
            .returning(|_| Ok(SubmitOutcome::TransportFailure));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        pipeline.offer(vehicle_record(1.0));
        pipeline.pump(Instant::now()).await.unwrap();
        assert!(!pipeline.has_pending());
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let mut api = MockIngestApi::new();
        api.expect_post_telemetry()
            .times(1)
            .returning(|_| Err(BridgeError::Unauthorized));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        pipeline.offer(vehicle_record(1.0));
        let err = pipeline.pump(Instant::now()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Unauthorized));
    }

    #[tokio::test]
    async fn test_status_sent_once_per_transition() {
        let mut api = MockIngestApi::new();
        api.expect_patch_status()
            .times(3)
            .returning(|_| Ok(SubmitOutcome::Delivered));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));

        pipeline.notify_status(LinkStatus::Connected).await.unwrap();
        // Same status repeated per tick must not resend
        pipeline.notify_status(LinkStatus::Connected).await.unwrap();
        pipeline.notify_status(LinkStatus::Connected).await.unwrap();

        pipeline.notify_status(LinkStatus::Disconnected).await.unwrap();
        pipeline.notify_status(LinkStatus::Disconnected).await.unwrap();

        pipeline.notify_status(LinkStatus::Connected).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_failures_are_best_effort() {
        let mut api = MockIngestApi::new();
        api.expect_patch_status()
            .times(1)
            .returning(|_| Err(BridgeError::Delivery("boom".to_string())));

        let mut pipeline = DeliveryPipeline::new(api, Duration::from_secs(1));
        assert!(pipeline.notify_status(LinkStatus::Connected).await.is_ok());
    }
}
