//! Publish-now-or-spool decision for every outbound message.
//!
//! The router never fails: a message is either delivered, stored in the
//! spool for replay, or reported lost when the spool itself cannot take it.

use std::{fmt, sync::Arc};

use serde::Serialize;
use tracing::{debug, warn};

use edgewatch_mqtt::TransferError;

use super::spool::{QueueRecord, RecordSink, Replay, Spool};

/// Live publish primitive.
#[async_trait::async_trait]
pub trait Outbound: Send + Sync {
    /// Fast check of the link; `false` sends the message straight to the spool.
    fn is_connected(&self) -> bool;

    /// Publishes and waits (bounded) for the broker to accept the message.
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait::async_trait]
impl Outbound for edgewatch_mqtt::Publisher {
    fn is_connected(&self) -> bool {
        edgewatch_mqtt::Publisher::is_connected(self)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        edgewatch_mqtt::Publisher::publish(self, topic, payload.to_vec(), qos, retain)
            .await
            .map_err(|e| Box::new(e) as _)
    }
}

/// Replays spooled records through an [`Outbound`] during a flush.
pub struct LiveSink<'a> {
    outbound: &'a dyn Outbound,
}

impl<'a> LiveSink<'a> {
    pub fn new(outbound: &'a dyn Outbound) -> Self {
        LiveSink { outbound }
    }
}

#[async_trait::async_trait]
impl RecordSink for LiveSink<'_> {
    /// Transport failures (not connected, no ack, link lost, channel full)
    /// make the sink unreachable; anything else refuses only this record.
    async fn deliver(&self, record: &QueueRecord) -> Replay {
        match self
            .outbound
            .publish(&record.topic, record.payload.as_bytes(), record.qos, record.retain)
            .await
        {
            Ok(()) => Replay::Delivered,
            Err(e) => {
                debug!("Replay of '{}' failed: {}", record.topic, e);
                match e.downcast_ref::<TransferError>() {
                    Some(e) if e.is_publish_failure() => Replay::Unreachable,
                    _ => Replay::Refused,
                }
            }
        }
    }
}

/// What happened to a message handed to [`DeliveryRouter::publish_or_spool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the broker.
    Delivered,
    /// Stored for replay; carries why the live publish was skipped or failed.
    Spooled(String),
    /// Neither published nor stored.
    Lost(String),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Delivered => write!(f, "delivered"),
            Delivery::Spooled(reason) => write!(f, "spooled ({})", reason),
            Delivery::Lost(reason) => write!(f, "lost ({})", reason),
        }
    }
}

#[derive(Clone)]
pub struct DeliveryRouter {
    outbound: Arc<dyn Outbound>,
    spool: Spool,
}

impl DeliveryRouter {
    pub fn new(outbound: Arc<dyn Outbound>, spool: Spool) -> Self {
        DeliveryRouter { outbound, spool }
    }

    pub fn outbound(&self) -> &Arc<dyn Outbound> {
        &self.outbound
    }

    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    pub async fn publish_or_spool(&self, topic: &str, payload: &str, qos: u8, retain: bool) -> Delivery {
        let reason = if self.outbound.is_connected() {
            match self
                .outbound
                .publish(topic, payload.as_bytes(), qos, retain)
                .await
            {
                Ok(()) => {
                    debug!("Published to '{}'", topic);
                    return Delivery::Delivered;
                }
                Err(e) => e.to_string(),
            }
        } else {
            "not connected".to_string()
        };

        let record = QueueRecord::new(topic, payload, qos, retain);
        match self.spool.append(&record).await {
            Ok(()) => {
                debug!("Spooled message for '{}': {}", topic, reason);
                Delivery::Spooled(reason)
            }
            Err(e) => {
                warn!("Message for '{}' lost, spool append failed: {}", topic, e);
                Delivery::Lost(e.to_string())
            }
        }
    }

    /// Serializes `payload` to JSON, then routes it like [`Self::publish_or_spool`].
    pub async fn publish_json_or_spool<T>(&self, topic: &str, payload: &T, qos: u8, retain: bool) -> Delivery
    where
        T: Serialize + Sync + ?Sized,
    {
        match serde_json::to_string(payload) {
            Ok(text) => self.publish_or_spool(topic, &text, qos, retain).await,
            Err(e) => {
                warn!("Failed to serialize payload for '{}': {}", topic, e);
                Delivery::Lost(e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;
    use crate::core::spool::{DurableQueue, KeepAll};

    /// Records every publish; times out while `failing` is set and rejects
    /// payloads listed in `rejected`.
    #[derive(Default)]
    pub(crate) struct MockOutbound {
        pub connected: AtomicBool,
        pub failing: AtomicBool,
        pub rejected: Mutex<Vec<String>>,
        pub published: Mutex<Vec<(String, String, u8, bool)>>,
    }

    impl MockOutbound {
        pub fn connected() -> Self {
            let outbound = MockOutbound::default();
            outbound.connected.store(true, Ordering::SeqCst);
            outbound
        }

        pub fn publish_count(&self) -> usize {
            self.published.lock().unwrap().len()
        }

        pub fn published(&self) -> Vec<(String, String, u8, bool)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Outbound for MockOutbound {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn publish(
            &self,
            topic: &str,
            payload: &[u8],
            qos: u8,
            retain: bool,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Box::new(TransferError::AckTimeout(3000)));
            }
            let text = String::from_utf8_lossy(payload).into_owned();
            if self.rejected.lock().unwrap().contains(&text) {
                return Err(format!("payload '{text}' rejected").into());
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), text, qos, retain));
            Ok(())
        }
    }

    pub(crate) async fn spool(dir: &TempDir) -> Spool {
        Spool::new(
            DurableQueue::open(dir.path().join("spool.jsonl"), KeepAll)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_connected_publish_is_delivered() {
        let dir = TempDir::new().unwrap();
        let outbound = Arc::new(MockOutbound::connected());
        let router = DeliveryRouter::new(outbound.clone(), spool(&dir).await);

        let delivery = router.publish_or_spool("home/iot/cam/telemetry", "{}", 1, false).await;

        assert!(delivery.is_delivered());
        assert_eq!(
            outbound.published(),
            vec![("home/iot/cam/telemetry".into(), "{}".into(), 1, false)]
        );
        assert_eq!(router.spool().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_publish_is_spooled() {
        let dir = TempDir::new().unwrap();
        let outbound = Arc::new(MockOutbound::default());
        let router = DeliveryRouter::new(outbound.clone(), spool(&dir).await);

        let delivery = router.publish_or_spool("t", "payload", 1, false).await;

        assert_eq!(delivery, Delivery::Spooled("not connected".into()));
        assert!(!delivery.is_delivered());
        assert_eq!(outbound.publish_count(), 0);

        let records = router.spool().records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "t");
        assert_eq!(records[0].payload, "payload");
        assert!(records[0].enqueued_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_publish_is_spooled_with_reason() {
        let dir = TempDir::new().unwrap();
        let outbound = Arc::new(MockOutbound::connected());
        outbound.failing.store(true, Ordering::SeqCst);
        let router = DeliveryRouter::new(outbound.clone(), spool(&dir).await);

        let delivery = router.publish_or_spool("t", "p", 1, false).await;

        match delivery {
            Delivery::Spooled(reason) => assert!(reason.contains("acknowledgement")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(router.spool().len().await.unwrap(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_spool_failure_is_lost() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened for append.
        let queue = DurableQueue::open(dir.path(), KeepAll).await.unwrap();
        let router = DeliveryRouter::new(Arc::new(MockOutbound::default()), Spool::new(queue));

        let delivery = router.publish_or_spool("t", "p", 1, false).await;

        assert!(matches!(delivery, Delivery::Lost(_)));
        assert!(logs_contain("spool append failed"));
    }

    #[tokio::test]
    async fn test_json_payload_is_serialized() {
        #[derive(Serialize)]
        struct Beat {
            uptime_s: u64,
        }

        let dir = TempDir::new().unwrap();
        let outbound = Arc::new(MockOutbound::connected());
        let router = DeliveryRouter::new(outbound.clone(), spool(&dir).await);

        router
            .publish_json_or_spool("t", &Beat { uptime_s: 12 }, 1, false)
            .await;

        assert_eq!(outbound.published()[0].1, r#"{"uptime_s":12}"#);
    }

    #[tokio::test]
    async fn test_live_sink_reports_outcome() {
        let outbound = MockOutbound::connected();
        let record = QueueRecord::new("t", "p", 0, true);
        let sink = LiveSink::new(&outbound);

        assert_eq!(sink.deliver(&record).await, Replay::Delivered);

        outbound.rejected.lock().unwrap().push("p".into());
        assert_eq!(sink.deliver(&record).await, Replay::Refused);

        outbound.failing.store(true, Ordering::SeqCst);
        assert_eq!(sink.deliver(&record).await, Replay::Unreachable);

        assert_eq!(outbound.published(), vec![("t".into(), "p".into(), 0, true)]);
    }

    #[test]
    fn test_delivery_display() {
        assert_eq!(Delivery::Delivered.to_string(), "delivered");
        assert_eq!(
            Delivery::Spooled("not connected".into()).to_string(),
            "spooled (not connected)"
        );
    }
}
