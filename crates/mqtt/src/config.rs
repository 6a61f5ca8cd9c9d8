//! MQTT transport configuration.
//!
//! Deserialized from the `[transport]` table of the agent configuration and
//! validated with the `validator` crate, so a bad broker setting fails at
//! load time instead of at the first connect.
//!
//! # Examples
//!
//! ```toml
//! [transport]
//! host = "mqtt.home.local"
//! port = 8883
//! base_topic = "home/iot/cam-01"
//! max_inflight = 20
//! reconnect_min_delay = 1
//! reconnect_max_delay = 60
//!
//! [transport.tls]
//! enabled = true        # platform trust store unless ca_cert_path is set
//! ca_cert_path = "/etc/edgewatch/ca.pem"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Suffix of the retained liveness topic under the base topic.
pub const STATUS_SUFFIX: &str = "status/online";

/// Main MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_reconnect_window"))]
pub struct Config {
    /// Topic prefix for everything this device publishes.
    ///
    /// Left empty, the agent fills it in as `home/iot/<device_id>`.
    #[validate(
        length(max = 255, message = "Base topic must not exceed 255 characters"),
        custom(function = "validate_no_wildcards")
    )]
    pub base_topic: String,

    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port (1883 plain, 8883 TLS).
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// TCP connect + CONNACK timeout in seconds.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Ask the broker for a clean session on every connect.
    pub clean_session: bool,

    /// Maximum number of QoS 1/2 publishes awaiting acknowledgement.
    ///
    /// When the window is full the client stops taking new publishes from
    /// the request channel until acknowledgements come back.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// MQTT client identifier. Empty means "use the device id"; if that is
    /// empty too, a UUID is generated.
    #[validate(length(max = 64, message = "Client ID must not exceed 64 characters"))]
    pub client_id: String,

    /// Broker username, if the broker wants one.
    pub username: Option<String>,

    /// Broker password. Ignored without `username`.
    pub password: Option<String>,

    /// Maximum MQTT packet size in bytes, both directions.
    ///
    /// Events can inline a base64 snapshot, so this is well above the
    /// protocol minimum by default.
    #[validate(range(
        min = 1024,
        max = 268_435_455,
        message = "Max packet size must be between 1 KiB and 256 MiB"
    ))]
    pub max_packet_size: Option<u32>,

    /// Capacity of the bounded request channel between client and event loop.
    #[validate(range(
        min = 1,
        max = 4096,
        message = "Request channel capacity must be between 1 and 4096"
    ))]
    pub request_channel_capacity: Option<u16>,

    /// Backoff floor in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect min delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_min_delay: u64,

    /// Backoff ceiling in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect max delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_max_delay: u64,

    /// Backoff growth factor.
    #[validate(range(
        min = 1.0,
        max = 10.0,
        message = "Reconnect multiplier must be between 1.0 and 10.0"
    ))]
    pub reconnect_multiplier: f64,

    /// How long a live publish waits for PUBACK/PUBCOMP, in milliseconds.
    #[validate(range(
        min = 100,
        max = 60_000,
        message = "Ack timeout must be between 100 and 60000 ms"
    ))]
    pub ack_timeout_ms: u64,

    /// TLS settings. Absent, or neither enabled nor given a CA, means plain TCP.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_topic: String::new(),
            host: "localhost".to_string(),
            port: 1883,
            connection_timeout: 10,
            clean_session: true,
            max_inflight: 20,
            keep_alive: 60,
            client_id: String::new(),
            username: None,
            password: None,
            max_packet_size: Some(1024 * 1024),
            request_channel_capacity: Some(64),
            reconnect_min_delay: 1,
            reconnect_max_delay: 60,
            reconnect_multiplier: 2.0,
            ack_timeout_ms: 3000,
            tls: None,
        }
    }
}

impl Config {
    /// Prefixes `topic` with the base topic.
    pub fn with_base_topic(&self, topic: &str) -> String {
        if self.base_topic.is_empty() {
            topic.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_topic.trim_end_matches('/'),
                topic.trim_start_matches('/')
            )
        }
    }

    /// The retained liveness topic, `<base>/status/online`.
    pub fn status_topic(&self) -> String {
        self.with_base_topic(STATUS_SUFFIX)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_secs(self.reconnect_min_delay)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay)
    }
}

fn validate_reconnect_window(config: &Config) -> Result<(), ValidationError> {
    if config.reconnect_min_delay > config.reconnect_max_delay {
        return Err(ValidationError::new("reconnect_window").with_message(
            "reconnect_min_delay must not exceed reconnect_max_delay".into(),
        ));
    }
    Ok(())
}

fn validate_no_wildcards(topic: &str) -> Result<(), ValidationError> {
    if topic.contains('+') || topic.contains('#') {
        return Err(ValidationError::new("topic_wildcard")
            .with_message("Base topic must not contain MQTT wildcards".into()));
    }
    Ok(())
}

/// TLS/SSL configuration for secure broker connections.
///
/// TLS is on when `enabled` is set or a CA file is given. Without a CA file
/// the broker is verified against the platform trust store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,

    /// Accept a broker certificate issued for another host name. The chain
    /// is still verified.
    pub insecure: bool,

    /// CA certificate (PEM) used to verify the broker.
    #[validate(custom(
        function = "validate_file_path",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    /// Client certificate (PEM) for mutual TLS. Needs `client_key_path`.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    /// Client private key (PEM, unencrypted). Needs `client_cert_path`.
    #[validate(custom(
        function = "validate_file_path",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled || self.ca_cert_path.is_some()
    }

    /// The setup needs a hand-built rustls config rather than a CA file
    /// handed to rumqttc.
    pub fn needs_custom_verifier(&self) -> bool {
        self.insecure || self.ca_cert_path.is_none()
    }

    /// Checks the whole TLS setup right before building the transport.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        if let Some(ca) = self.ca_cert_path.as_deref() {
            validate_file_path(ca)?;
        }

        match (
            self.client_cert_path.as_deref(),
            self.client_key_path.as_deref(),
        ) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)?;
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::new("incomplete_client_auth").with_message(
                    "Both client certificate and key must be provided or neither".into(),
                ));
            }
        }

        Ok(())
    }
}

/// The path is non-empty and names an existing regular file.
fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }

    Ok(())
}
