//! Periodic work loop.
//!
//! One task ticks at a fixed rate. On every tick the heartbeat and the
//! capture job each check their own interval against a monotonic clock and
//! run when due; both are due on the first tick. A tick runs its jobs to
//! completion, so cancellation takes effect between ticks.

use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    artifacts::{SnapshotStore, Uploader},
    collectors::{DataProducer, TelemetrySample},
    debounce::{EventDebouncer, Signature},
    event::{EventPayload, TelemetryPayload},
    router::{Delivery, DeliveryRouter},
    vision::Detector,
};
use crate::config::Config;

/// Tick rate and job intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub tick: Duration,
    pub heartbeat: Duration,
    pub capture: Duration,
}

impl Schedule {
    pub fn from_config(config: &Config) -> Self {
        Schedule {
            tick: config.agent.tick(),
            heartbeat: config.agent.heartbeat(),
            capture: config.agent.capture(),
        }
    }
}

/// Interval bookkeeping for one job.
#[derive(Debug, Clone)]
struct Due {
    every: Duration,
    last: Option<Instant>,
}

impl Due {
    fn new(every: Duration) -> Self {
        Due { every, last: None }
    }

    /// True when the job should run at `now`; marks it as run.
    fn check(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.every);
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// Capture collaborators; absent in telemetry-only mode.
pub struct Vision {
    detector: Arc<dyn Detector>,
    debouncer: EventDebouncer,
    snapshots: SnapshotStore,
    uploader: Option<Arc<dyn Uploader>>,
    threshold: f32,
}

impl Vision {
    pub fn new(
        detector: Arc<dyn Detector>,
        debouncer: EventDebouncer,
        snapshots: SnapshotStore,
        threshold: f32,
    ) -> Self {
        Vision {
            detector,
            debouncer,
            snapshots,
            uploader: None,
            threshold,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }
}

pub struct Scheduler {
    router: DeliveryRouter,
    telemetry: Arc<dyn DataProducer<Output = TelemetrySample>>,
    vision: Option<Vision>,
    device_id: String,
    telemetry_topic: String,
    events_topic: String,
    tick: Duration,
    heartbeat: Due,
    capture: Due,
}

impl Scheduler {
    pub fn new(
        router: DeliveryRouter,
        telemetry: Arc<dyn DataProducer<Output = TelemetrySample>>,
        schedule: Schedule,
        device_id: impl Into<String>,
        telemetry_topic: impl Into<String>,
        events_topic: impl Into<String>,
    ) -> Self {
        Scheduler {
            router,
            telemetry,
            vision: None,
            device_id: device_id.into(),
            telemetry_topic: telemetry_topic.into(),
            events_topic: events_topic.into(),
            tick: schedule.tick,
            heartbeat: Due::new(schedule.heartbeat),
            capture: Due::new(schedule.capture),
        }
    }

    pub fn with_vision(mut self, vision: Vision) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Ticks until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started: heartbeat every {:?}, capture every {:?} ({})",
            self.heartbeat.every,
            self.capture.every,
            match &self.vision {
                Some(vision) => vision.detector.name().to_string(),
                None => "telemetry only".to_string(),
            }
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(Instant::now()).await;
        }

        info!("Scheduler stopped");
    }

    /// Runs whatever is due at `now`.
    pub async fn tick(&mut self, now: Instant) {
        if self.heartbeat.check(now) {
            self.heartbeat().await;
        }
        if self.vision.is_some() && self.capture.check(now) {
            self.capture(now).await;
        }
    }

    async fn heartbeat(&self) -> Option<Delivery> {
        let sample = match self.telemetry.produce().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Telemetry sampling failed: {}", e);
                return None;
            }
        };

        let payload = TelemetryPayload::new(&self.device_id, sample);
        let delivery = self
            .router
            .publish_json_or_spool(&self.telemetry_topic, &payload, 1, false)
            .await;
        debug!("Heartbeat {}", delivery);
        Some(delivery)
    }

    async fn capture(&mut self, now: Instant) -> Option<Delivery> {
        let vision = self.vision.as_mut()?;

        let frame = match vision.detector.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("No frame captured");
                return None;
            }
            Err(e) => {
                warn!("Frame capture failed: {}", e);
                return None;
            }
        };

        let result = match vision.detector.detect(&frame, vision.threshold).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Detection failed: {}", e);
                return None;
            }
        };

        let signature = Signature::of(&result);
        if result.is_empty() {
            vision.debouncer.reset(signature);
            return None;
        }
        if !vision.debouncer.should_emit(&signature, now) {
            trace!("Event {} suppressed by cooldown", signature);
            return None;
        }

        let mut payload = EventPayload::new(&self.device_id, &result);
        let snapshot = match vision.snapshots.save(&self.device_id, &frame).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Snapshot not saved: {}", e);
                None
            }
        };

        if let (Some(snapshot), Some(uploader)) = (&snapshot, &vision.uploader) {
            match uploader.send(&payload, &snapshot.path).await {
                Ok(url) => payload.snapshot_url = url,
                Err(e) => warn!("Snapshot upload failed: {}", e),
            }
        }
        if let Some(snapshot) = snapshot {
            payload.snapshot_path = Some(snapshot.path.display().to_string());
            payload.snapshot_b64 = snapshot.b64;
        }

        info!(
            "Detection event: {} face(s), labels {:?}",
            payload.faces, payload.labels
        );
        let delivery = self
            .router
            .publish_json_or_spool(&self.events_topic, &payload, 1, false)
            .await;
        if delivery.is_delivered() {
            debug!("Event {}", delivery);
        } else {
            info!("Event not delivered live: {}", delivery);
        }
        Some(delivery)
    }
}
