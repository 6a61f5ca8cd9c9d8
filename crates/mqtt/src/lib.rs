//! # edgewatch-mqtt: MQTT transport with acknowledged publishes
//!
//! Built on top of `rumqttc`, this crate adds what a device agent needs to
//! decide whether a message was delivered or must be kept for later:
//!
//! - **Reconnection that never gives up**, with exponential backoff
//! - **State monitoring** through a `watch` channel
//! - **Acknowledged publishes**: `Publisher::publish` resolves on PUBACK
//!   (or PUBCOMP) within a bounded wait, and fails fast while disconnected
//! - **Liveness topic**: the Last Will publishes `"0"` retained on
//!   `<base_topic>/status/online`
//! - **TLS/SSL** against a CA file or the platform trust store, with optional
//!   client certificate authentication
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use edgewatch_mqtt::{Config, MqttManager, Publisher};
//!
//! let config = Config {
//!     host: "mqtt.home.local".into(),
//!     base_topic: "home/iot/cam-01".into(),
//!     ..Default::default()
//! };
//! let instance = Arc::new(MqttManager::from_config(config)?.build_and_start().await?);
//! let publisher = Publisher::new(instance.clone());
//!
//! match publisher.publish("home/iot/cam-01/telemetry", payload, 1, false).await {
//!     Ok(()) => {}
//!     Err(e) if e.is_publish_failure() => { /* keep it for later */ }
//!     Err(e) => return Err(e.into()),
//! }
//! ```
//!
//! ## Reconnection
//!
//! ```text
//! Attempt 1: wait 1s
//! Attempt 2: wait 2s
//! Attempt 3: wait 4s
//! ...
//! Attempt 7+: wait 60s (capped)
//! ```
//!
//! Refusals that retrying will not fix soon (bad credentials, TLS) wait at
//! the ceiling straight away.
//!
//! ## State Monitoring
//!
//! ```ignore
//! let mut state_rx = instance.state();
//! while state_rx.changed().await.is_ok() {
//!     if state_rx.borrow_and_update().is_connected() {
//!         // announce, flush ...
//!     }
//! }
//! ```

pub mod ack;
pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod state;
mod tls;

pub use ack::AckTracker;
pub use backoff::Backoff;
pub use client::ClientBuilder;
pub use config::{Config, TlsConfig, STATUS_SUFFIX};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager, PublishDrain};
pub use publisher::Publisher;
pub use state::ConnectionState;

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransferError>;
