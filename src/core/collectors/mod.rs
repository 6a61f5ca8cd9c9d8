//! Telemetry producers.
//!
//! Each module samples one piece of device state through [`DataProducer`];
//! [`TelemetryCollector`] joins them into the heartbeat sample.

/// Error types shared by all producers.
pub mod error;

/// Root filesystem usage via `statvfs`.
pub mod filesys;

/// Primary IPv4 address.
pub mod network;

/// Heartbeat sample assembled from the other producers.
pub mod telemetry;

/// CPU temperature from sysfs thermal zones.
pub mod thermal;

pub mod traits;

pub mod types;

/// Agent process uptime.
pub mod uptime;

pub use error::CollectorError;
pub use telemetry::TelemetryCollector;
pub use traits::DataProducer;
pub use types::{CollectorResult, DiskUsage, TelemetrySample};
