//! # Bridge Loop
//!
//! The cooperative scheduler: poll transport, decode, supervise connection
//! health, submit. One polling tick per iteration, single task, no shared
//! state. Transport reads and HTTP submissions are the only suspension
//! points and both are bounded by explicit timeouts.

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::decoder::{Decoded, RemoteDecoder, VehicleDecoder};
use crate::delivery::{DeliveryPipeline, IngestApi, LinkStatus};
use crate::error::Result;
use crate::supervisor::{ConnectionState, ConnectionSupervisor, StateChange};
use crate::transport::{LinkTransport, ReadOutcome};

/// Frame decoder for whichever link kind the bridge is attached to
pub enum FrameDecoder {
    Vehicle(VehicleDecoder),
    Remote(RemoteDecoder),
}

impl FrameDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Decoded> {
        match self {
            FrameDecoder::Vehicle(decoder) => decoder.decode(frame),
            FrameDecoder::Remote(decoder) => decoder.decode(frame),
        }
    }
}

/// One bridge instance: a device link, its decoder, and the delivery path
pub struct BridgeLoop<T, A> {
    transport: T,
    decoder: FrameDecoder,
    supervisor: ConnectionSupervisor,
    pipeline: DeliveryPipeline<A>,
    tick_period: Duration,
    read_timeout: Duration,
}

impl<T: LinkTransport, A: IngestApi> BridgeLoop<T, A> {
    pub fn new(
        transport: T,
        decoder: FrameDecoder,
        supervisor: ConnectionSupervisor,
        pipeline: DeliveryPipeline<A>,
        tick_period: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            decoder,
            supervisor,
            pipeline,
            tick_period,
            read_timeout,
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// The current tick always completes before exit; the device link is
    /// then closed and a best-effort disconnect notification sent.
    ///
    /// # Errors
    ///
    /// Returns early only on fatal conditions (credential rejection).
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ticker = interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("fatal bridge error: {}", e);
                        self.shutdown().await;
                        return Err(e);
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One polling tick
    async fn tick(&mut self) -> Result<()> {
        match self.supervisor.state() {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.try_connect().await?;
            }
            ConnectionState::Connected | ConnectionState::Degraded => {
                self.poll_link().await?;
                self.pipeline.pump(Instant::now()).await?;
            }
        }
        Ok(())
    }

    async fn try_connect(&mut self) -> Result<()> {
        if !self.supervisor.ready_to_connect(Instant::now()) {
            return Ok(());
        }

        self.supervisor.begin_connect();
        match self.transport.open().await {
            Ok(()) => {
                self.supervisor.connect_succeeded();
                self.pipeline.notify_status(LinkStatus::Connected).await?;
            }
            Err(e) => {
                warn!("connect failed: {}", e);
                self.supervisor.connect_failed(Instant::now());
                self.pipeline.notify_status(LinkStatus::Disconnected).await?;
            }
        }
        Ok(())
    }

    async fn poll_link(&mut self) -> Result<()> {
        let change = match self.transport.read(self.read_timeout).await {
            Ok(ReadOutcome::Frame(frame)) => match self.decoder.decode(&frame) {
                Ok(Decoded::Record(record)) => {
                    self.pipeline.offer(record);
                    self.supervisor.read_succeeded()
                }
                Ok(Decoded::Partial) | Ok(Decoded::Empty) => self.supervisor.read_succeeded(),
                Err(e) => {
                    // Garbled frames count toward the error budget but are
                    // never fatal
                    debug!("decode error: {}", e);
                    self.supervisor.read_failed(Instant::now())
                }
            },
            Ok(ReadOutcome::Idle) => self.supervisor.read_failed(Instant::now()),
            Err(e) => {
                warn!("read error: {}", e);
                self.supervisor.read_failed(Instant::now())
            }
        };

        if let Some(change) = change {
            self.apply_change(change).await?;
        }
        Ok(())
    }

    async fn apply_change(&mut self, change: StateChange) -> Result<()> {
        match change.to {
            ConnectionState::Disconnected => {
                self.transport.close().await;
                self.pipeline.notify_status(LinkStatus::Disconnected).await?;
            }
            ConnectionState::Connected => {
                self.pipeline.notify_status(LinkStatus::Connected).await?;
            }
            // Degraded is internal hysteresis; externally the link is
            // still connected
            _ => {}
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.supervisor.shutdown();
        self.transport.close().await;
        if let Err(e) = self.pipeline.notify_status(LinkStatus::Disconnected).await {
            debug!("disconnect notification failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::advance;

    use crate::delivery::{MockIngestApi, SubmitOutcome};
    use crate::mav::testutil::*;
    use crate::record::TelemetryRecord;
    use crate::transport::mocks::{MockLink, MockStep};

    const TICK: Duration = Duration::from_millis(100);
    const READ_TIMEOUT: Duration = Duration::from_millis(50);

    fn vehicle_bridge(
        link: MockLink,
        api: MockIngestApi,
        min_interval: Duration,
    ) -> BridgeLoop<MockLink, MockIngestApi> {
        BridgeLoop::new(
            link,
            FrameDecoder::Vehicle(VehicleDecoder::new("session_test".to_string())),
            ConnectionSupervisor::new(10, 30, Duration::from_secs(5)),
            DeliveryPipeline::new(api, min_interval),
            TICK,
            READ_TIMEOUT,
        )
    }

    fn permissive_status(api: &mut MockIngestApi) {
        api.expect_patch_status().returning(|_| Ok(SubmitOutcome::Delivered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_three_position_frames_share_battery_and_session() {
        let submitted: Arc<Mutex<Vec<TelemetryRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = submitted.clone();

        let mut api = MockIngestApi::new();
        permissive_status(&mut api);
        api.expect_post_telemetry().returning(move |record| {
            sink.lock().unwrap().push(record);
            Ok(SubmitOutcome::Delivered)
        });

        let link = MockLink::new();
        link.push_step(MockStep::Frame(battery_frame(77)));
        link.push_step(MockStep::Frame(position_frame(515_050_000, -900_000, 0, 0, 0)));
        link.push_step(MockStep::Frame(position_frame(515_051_000, -900_000, 0, 0, 0)));
        link.push_step(MockStep::Frame(position_frame(515_052_000, -901_000, 0, 0, 0)));

        let mut bridge = vehicle_bridge(link, api, Duration::from_millis(100));

        // First tick connects, the rest consume the scripted frames
        for _ in 0..6 {
            bridge.tick().await.unwrap();
            advance(Duration::from_millis(200)).await;
        }

        let records = submitted.lock().unwrap();
        assert_eq!(records.len(), 3, "exactly one submission per position frame");

        let mut sessions = Vec::new();
        let expected = [(51.5050, -0.0900), (51.5051, -0.0900), (51.5052, -0.0901)];
        for (record, (lat, lon)) in records.iter().zip(expected) {
            match record {
                TelemetryRecord::Vehicle(v) => {
                    assert!((v.latitude - lat).abs() < 1e-9);
                    assert!((v.longitude - lon).abs() < 1e-9);
                    assert_eq!(v.battery, 77.0, "cached battery merged into every record");
                    sessions.push(v.session_id.clone());
                }
                other => panic!("expected vehicle record, got {:?}", other),
            }
        }
        assert!(sessions.windows(2).all(|w| w[0] == w[1]), "session_id stable across records");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_reads_degrade_then_disconnect_and_reconnect() {
        let mut api = MockIngestApi::new();
        permissive_status(&mut api);

        let link = MockLink::new();
        let probe = link.clone();
        let mut bridge = vehicle_bridge(link, api, Duration::from_secs(1));

        bridge.tick().await.unwrap();
        assert_eq!(bridge.supervisor.state(), ConnectionState::Connected);
        assert_eq!(probe.open_call_count(), 1);

        // Mock reads default to Idle once the script is exhausted
        for _ in 0..10 {
            bridge.tick().await.unwrap();
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Degraded);

        for _ in 0..20 {
            bridge.tick().await.unwrap();
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Disconnected);
        assert!(!probe.is_open(), "transport closed on disconnect");

        // Still waiting out the reconnect backoff
        bridge.tick().await.unwrap();
        assert_eq!(probe.open_call_count(), 1);

        advance(Duration::from_secs(5)).await;
        bridge.tick().await.unwrap();
        assert_eq!(probe.open_call_count(), 2);
        assert_eq!(bridge.supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_degrade_then_disconnect_without_aborting() {
        let mut api = MockIngestApi::new();
        permissive_status(&mut api);

        let link = MockLink::new();
        // An unplugged device surfaces as read errors, not idle reads
        for _ in 0..30 {
            link.push_step(MockStep::Error);
        }
        let probe = link.clone();
        let mut bridge = vehicle_bridge(link, api, Duration::from_secs(1));

        bridge.tick().await.unwrap();
        assert_eq!(bridge.supervisor.state(), ConnectionState::Connected);

        // Every errored tick still completes cleanly
        for _ in 0..10 {
            assert!(bridge.tick().await.is_ok());
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Degraded);

        for _ in 0..20 {
            assert!(bridge.tick().await.is_ok());
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Disconnected);
        assert!(!probe.is_open(), "transport closed after persistent read errors");
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_errors_count_toward_error_budget() {
        let mut api = MockIngestApi::new();
        permissive_status(&mut api);

        let link = MockLink::new();
        for _ in 0..10 {
            link.push_step(MockStep::Frame(vec![0x12, 0x34, 0x56]));
        }
        let mut bridge = vehicle_bridge(link, api, Duration::from_secs(1));

        bridge.tick().await.unwrap();
        for _ in 0..10 {
            bridge.tick().await.unwrap();
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_recovers_without_status_flapping() {
        let statuses: Arc<Mutex<Vec<LinkStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();

        let mut api = MockIngestApi::new();
        api.expect_patch_status().returning(move |status| {
            sink.lock().unwrap().push(status);
            Ok(SubmitOutcome::Delivered)
        });
        api.expect_post_telemetry().returning(|_| Ok(SubmitOutcome::Delivered));

        let link = MockLink::new();
        for _ in 0..10 {
            link.push_step(MockStep::Idle);
        }
        link.push_step(MockStep::Frame(position_frame(0, 0, 0, 0, 0)));

        let mut bridge = vehicle_bridge(link, api, Duration::from_secs(1));
        for _ in 0..12 {
            bridge.tick().await.unwrap();
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Connected);

        // Connect reported once; Degraded round-trips are invisible
        assert_eq!(*statuses.lock().unwrap(), vec![LinkStatus::Connected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_notification_sent_once_not_per_tick() {
        let statuses: Arc<Mutex<Vec<LinkStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();

        let mut api = MockIngestApi::new();
        api.expect_patch_status().returning(move |status| {
            sink.lock().unwrap().push(status);
            Ok(SubmitOutcome::Delivered)
        });

        let link = MockLink::new();
        // Reconnect attempts during the backoff window must not re-open
        link.push_open_result(true);

        let mut bridge = vehicle_bridge(link, api, Duration::from_secs(1));
        for _ in 0..40 {
            bridge.tick().await.unwrap();
        }
        assert_eq!(bridge.supervisor.state(), ConnectionState::Disconnected);

        let disconnects = statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == LinkStatus::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_suspends_submissions_but_not_reads() {
        let post_calls = Arc::new(Mutex::new(0u32));
        let counter = post_calls.clone();

        let mut api = MockIngestApi::new();
        permissive_status(&mut api);
        api.expect_post_telemetry().returning(move |_| {
            let mut calls = counter.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok(SubmitOutcome::RateLimited(Duration::from_secs(5)))
            } else {
                Ok(SubmitOutcome::Delivered)
            }
        });

        let link = MockLink::new();
        for i in 0..60 {
            link.push_step(MockStep::Frame(position_frame(i, 0, 0, 0, 0)));
        }
        let probe = link.clone();

        let mut bridge = vehicle_bridge(link, api, Duration::from_millis(100));
        bridge.tick().await.unwrap(); // connect
        bridge.tick().await.unwrap(); // first frame, rate limited
        assert_eq!(*post_calls.lock().unwrap(), 1);

        // The whole suspension window ticks by without a single submission
        for _ in 0..49 {
            advance(Duration::from_millis(100)).await;
            bridge.tick().await.unwrap();
        }
        assert_eq!(*post_calls.lock().unwrap(), 1);

        advance(Duration::from_millis(100)).await;
        bridge.tick().await.unwrap();
        assert_eq!(*post_calls.lock().unwrap(), 2, "retained record goes out when the window reopens");

        // Reads kept draining the whole time
        assert!(probe.steps.lock().unwrap().len() < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_aborts_the_run() {
        let mut api = MockIngestApi::new();
        permissive_status(&mut api);
        api.expect_post_telemetry()
            .returning(|_| Err(crate::error::BridgeError::Unauthorized));

        let link = MockLink::new();
        link.push_step(MockStep::Frame(position_frame(0, 0, 0, 0, 0)));

        let bridge = vehicle_bridge(link, api, Duration::from_millis(100));
        let result = bridge.run(std::future::pending()).await;
        assert!(matches!(result, Err(crate::error::BridgeError::Unauthorized)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown_with_disconnect_notification() {
        let statuses: Arc<Mutex<Vec<LinkStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();

        let mut api = MockIngestApi::new();
        api.expect_patch_status().returning(move |status| {
            sink.lock().unwrap().push(status);
            Ok(SubmitOutcome::Delivered)
        });

        let link = MockLink::new();
        let probe = link.clone();
        let bridge = vehicle_bridge(link, api, Duration::from_secs(1));

        bridge
            .run(async {
                tokio::time::sleep(Duration::from_millis(350)).await;
            })
            .await
            .unwrap();

        assert!(!probe.is_open());
        assert_eq!(
            statuses.lock().unwrap().last(),
            Some(&LinkStatus::Disconnected)
        );
    }
}
