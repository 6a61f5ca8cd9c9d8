//! MQTT Manager Module
//! High-level entry point that wires the client, the connection kernel and
//! the acknowledgement tracker together.
//!
//! The `MqttManager`:
//! 1. Takes a validated configuration
//! 2. Builds the client with the status topic as Last Will (`"0"`, retained)
//! 3. Spawns the connection kernel
//! 4. Returns an `MqttInstance` for application use
//!
//! # Typical Usage
//!
//! ```ignore
//! let manager = MqttManager::from_config(config)?;
//! let instance = Arc::new(manager.build_and_start().await?);
//! let publisher = Publisher::new(instance.clone());
//!
//! let mut state_rx = instance.state();
//! // wait for ConnectionState::Connected ...
//! publisher.publish("home/iot/cam/telemetry", payload, 1, false).await?;
//! instance.shutdown().await?;
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::AsyncClient;
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use validator::Validate;

use super::{
    ack::AckTracker, backoff::Backoff, client::ClientBuilder, config::Config,
    connection::ConnectionKernel, error::TransferError, state::ConnectionState,
};

/// Upper bound for the kernel to finish its DISCONNECT during shutdown.
const KERNEL_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts publishes in progress so shutdown can wait for them.
///
/// Each publish holds a [`PublishGuard`] from [`PublishDrain::enter`] until
/// its ack wait ends; the last guard dropped wakes [`PublishDrain::wait_idle`].
#[derive(Debug, Default)]
pub struct PublishDrain {
    inflight: AtomicUsize,
    notify: Notify,
}

impl PublishDrain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a publish; it counts until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> PublishGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        PublishGuard {
            drain: self.clone(),
        }
    }

    /// Publishes currently holding a guard.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Resolves once no publish is in progress.
    ///
    /// The `Notified` future is created before the counter is read, so a
    /// guard dropped in between still wakes this loop.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.inflight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the [`PublishDrain`] counter on drop.
pub struct PublishGuard {
    drain: Arc<PublishDrain>,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if self.drain.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drain.notify.notify_waiters();
        }
    }
}

/// Entry point for building the MQTT transport.
pub struct MqttManager {
    config: Config,
}

impl MqttManager {
    /// Creates a manager from an existing configuration struct.
    ///
    /// Fails if the configuration does not validate.
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Builds the client and spawns the connection kernel.
    ///
    /// Returns as soon as the kernel is running; the connection itself is
    /// established in the background. Watch [`MqttInstance::state`] to know
    /// when it is up.
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        let status_topic = self.config.status_topic();
        info!(
            "Building MQTT infrastructure for {}:{} (status topic '{}')",
            self.config.host, self.config.port, status_topic
        );

        let (client, event_loop) = ClientBuilder::from_config(&self.config)?
            .set_last_will(&status_topic, "0")
            .build()?;

        // Token that actually stops the ConnectionKernel.
        let connection_cancel = CancellationToken::new();
        let acks = Arc::new(AckTracker::new());
        let backoff = Backoff::new(
            self.config.reconnect_min(),
            self.config.reconnect_max(),
            self.config.reconnect_multiplier,
        );

        let mut kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            backoff,
            acks.clone(),
            connection_cancel.clone(),
        );
        let state_rx = kernel.subscribe_state();
        let is_connected = kernel.is_connected();

        let handle = tokio::spawn(async move {
            kernel.reconnect().await;
        });

        info!("MQTT infrastructure built successfully");

        Ok(MqttInstance {
            client,
            connection_cancel,
            publish_drain: Arc::new(PublishDrain::new()),
            state_rx,
            is_connected,
            acks,
            ack_timeout: self.config.ack_timeout(),
            status_topic,
            kernel: Arc::new(Mutex::new(Some(handle))),
        })
    }
}

/// Running MQTT transport.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Debug, Clone)]
pub struct MqttInstance {
    client: AsyncClient,

    /// Stops the connection kernel once publishes have drained.
    connection_cancel: CancellationToken,

    publish_drain: Arc<PublishDrain>,

    state_rx: watch::Receiver<ConnectionState>,

    /// Mirrors `Connected` for lock-free checks on the publish path.
    is_connected: Arc<AtomicBool>,

    /// Pairs publishes with their broker acknowledgements.
    acks: Arc<AckTracker>,

    ack_timeout: Duration,

    status_topic: String,

    /// Taken by the first `shutdown`.
    kernel: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MqttInstance {
    /// Request handle for the running event loop.
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    /// Receiver for connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// True between an accepted CONNACK and the next link loss.
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    /// Topic carrying the retained online flag (`"1"`/`"0"`).
    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// How long a publish waits for its acknowledgement.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub(crate) fn acks(&self) -> &AckTracker {
        &self.acks
    }

    /// Gracefully shuts down the MQTT connection.
    ///
    /// Waits for publishes in progress, then lets the kernel send DISCONNECT
    /// and waits (bounded) for it to finish. Calling it twice is harmless.
    pub async fn shutdown(&self) -> Result<(), TransferError> {
        let inflight = self.publish_drain.inflight();
        if inflight > 0 {
            info!("Waiting for {} publish(es) in progress", inflight);
        }
        self.publish_drain.wait_idle().await;
        self.connection_cancel.cancel();

        let handle = self.kernel.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(KERNEL_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("MQTT connection closed"),
                Ok(Err(e)) => {
                    return Err(TransferError::ConnectionKernel(e.to_string()));
                }
                Err(_) => warn!(
                    "Connection kernel did not stop within {:?}",
                    KERNEL_JOIN_TIMEOUT
                ),
            }
        }
        Ok(())
    }

    /// Shared counter of publishes in progress.
    pub fn publish_drain(&self) -> Arc<PublishDrain> {
        self.publish_drain.clone()
    }
}
