//! Publishing with a bounded acknowledgement wait.
//!
//! `Publisher::publish` returns `Ok(())` only once the broker acknowledged
//! the message (QoS 1/2) or it was written to the socket (QoS 0). Anything
//! else is an error the caller can act on, typically by spooling the message.

use std::sync::Arc;

use rumqttc::QoS;
use tracing::debug;

use super::{error::TransferError, manager::MqttInstance};

/// Publishes raw payloads through a running [`MqttInstance`].
#[derive(Debug, Clone)]
pub struct Publisher {
    instance: Arc<MqttInstance>,
}

impl Publisher {
    pub fn new(instance: Arc<MqttInstance>) -> Self {
        Self { instance }
    }

    /// True while the broker link is up.
    pub fn is_connected(&self) -> bool {
        self.instance.is_connected()
    }

    /// Publishes `payload` on `topic` (used verbatim) and waits for the ack.
    ///
    /// # Errors
    /// - `InvalidMetadata`: QoS outside 0..=2
    /// - `NotConnected`: the link is down, nothing was enqueued
    /// - `ClientTransfer`: the request channel is full or closed
    /// - `LinkLost`: the link dropped before the ack arrived
    /// - `AckTimeout`: no ack within the configured wait
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransferError> {
        let qos = qos_from_u8(qos)?;

        if !self.instance.is_connected() {
            return Err(TransferError::NotConnected);
        }

        let _guard = self.instance.publish_drain().enter();

        debug!(
            "Publishing to '{}': {} bytes (qos {:?}, retain {})",
            topic,
            payload.len(),
            qos,
            retain
        );

        let ack = self
            .instance
            .acks()
            .publish_tracked(self.instance.client(), topic, qos, retain, payload)?;

        let wait = self.instance.ack_timeout();
        match tokio::time::timeout(wait, ack).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) | Ok(Err(_)) => Err(TransferError::LinkLost),
            Err(_) => Err(TransferError::AckTimeout(wait.as_millis() as u64)),
        }
    }
}

/// Converts a numeric QoS to rumqttc's enum.
pub fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value {other}, expected 0, 1 or 2"
        ))),
    }
}
