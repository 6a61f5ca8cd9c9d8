//! edgewatch: edge-device agent publishing telemetry and detection events
//! over MQTT, with an on-disk spool for when the broker is out of reach.
//!
//! ## Modules
//!
//! * `config`: TOML configuration, defaults and validation via the
//!   `validator` crate.
//!
//! * `core`: Runtime components:
//!   - Durable spool and the publish-or-spool router
//!   - Connection supervisor (status marker, replay on reconnect)
//!   - Scheduler loop with heartbeat and capture jobs
//!   - Telemetry collectors, detector adapters, snapshot store and uploader
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! The MQTT transport lives in the `edgewatch-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod logger;
