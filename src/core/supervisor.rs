//! Reacts to link transitions: online marker and spool replay on connect,
//! offline marker on shutdown.

use std::sync::Arc;

use edgewatch_mqtt::{MqttInstance, TransferError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    link::{LinkMonitor, LinkState},
    router::{LiveSink, Outbound},
    spool::{FlushReport, Spool},
};

/// Retained on the status topic while the agent is connected.
pub const ONLINE: &str = "1";
/// Retained on the status topic after shutdown; also the last will.
pub const OFFLINE: &str = "0";

pub struct ConnectionSupervisor {
    outbound: Arc<dyn Outbound>,
    spool: Spool,
    status_topic: String,
    flush_max_records: usize,
}

impl ConnectionSupervisor {
    pub fn new(
        outbound: Arc<dyn Outbound>,
        spool: Spool,
        status_topic: impl Into<String>,
        flush_max_records: usize,
    ) -> Self {
        ConnectionSupervisor {
            outbound,
            spool,
            status_topic: status_topic.into(),
            flush_max_records,
        }
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Handles transitions until cancelled or the transport goes away.
    /// A transition already being handled runs to completion.
    pub async fn run(&self, mut monitor: LinkMonitor, cancel: CancellationToken) {
        debug!("Connection supervisor started (status topic '{}')", self.status_topic);

        loop {
            let transition = tokio::select! {
                _ = cancel.cancelled() => break,
                transition = monitor.next_transition() => transition,
            };

            match transition {
                Some(LinkState::Connected) => {
                    self.on_connected().await;
                }
                Some(LinkState::Disconnected(reason)) => {
                    warn!("Broker link down: {}", reason);
                }
                None => break,
            }
        }

        debug!("Connection supervisor stopped");
    }

    /// Publishes the online marker, then replays the spool.
    pub async fn on_connected(&self) -> Option<FlushReport> {
        info!("Broker link up");

        if let Err(e) = self
            .outbound
            .publish(&self.status_topic, ONLINE.as_bytes(), 1, true)
            .await
        {
            warn!("Failed to publish online status: {}", e);
        }

        let sink = LiveSink::new(self.outbound.as_ref());
        match self.spool.flush(&sink, self.flush_max_records).await {
            Ok(report) => {
                if report.sent > 0 {
                    info!(
                        "Spool flushed: {} sent, {} still spooled",
                        report.sent,
                        report.remaining()
                    );
                } else {
                    debug!("Spool flush sent nothing ({:?})", report);
                }
                if report.malformed > 0 {
                    warn!("Spool flush dropped {} malformed records", report.malformed);
                }
                Some(report)
            }
            Err(e) => {
                warn!("Spool flush failed: {}", e);
                None
            }
        }
    }

    /// Best-effort retained offline marker.
    pub async fn announce_offline(&self) {
        match self
            .outbound
            .publish(&self.status_topic, OFFLINE.as_bytes(), 1, true)
            .await
        {
            Ok(()) => debug!("Offline status published"),
            Err(e) => warn!("Failed to publish offline status: {}", e),
        }
    }

    /// Offline marker, then transport release (drain, DISCONNECT, join).
    pub async fn shutdown(&self, transport: &MqttInstance) -> Result<(), TransferError> {
        self.announce_offline().await;
        transport.shutdown().await
    }
}
