//! MQTT client builder with TLS, credentials and last-will support.
//!
//! `ClientBuilder` turns a [`Config`] into rumqttc's `AsyncClient` and
//! `EventLoop`. The two are returned together: the client enqueues requests,
//! the event loop (driven by the connection kernel) performs them.
//!
//! # Examples
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?
//!     .set_last_will(&config.status_topic(), "0")
//!     .build()?;
//! ```

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, TlsConfiguration, Transport};

use super::{
    config::{Config, TlsConfig},
    error::TransferError,
    tls,
};

/// Builder for constructing MQTT clients.
pub struct ClientBuilder {
    /// MQTT protocol options (host, port, keep-alive, credentials, etc.)
    opts: MqttOptions,

    /// Capacity of the bounded request channel.
    cap: usize,

    /// TCP connect + CONNACK timeout, in seconds.
    connection_timeout: u64,

    /// TLS settings, present only when TLS is enabled.
    tls_config: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Creates a builder from a validated [`Config`].
    ///
    /// Applies keep-alive, clean session, packet size, the inflight window and
    /// credentials. The last will is not set here; it depends on the topic
    /// layout chosen by the caller.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        if config.host.is_empty() {
            return Err(TransferError::ClientSetup("Broker host is empty".into()));
        }

        let client_id = non_empty_client_id(config.client_id.clone());
        let mut opts = MqttOptions::new(client_id, config.host.clone(), config.port);

        opts.set_keep_alive(Duration::from_secs(config.keep_alive));
        opts.set_clean_session(config.clean_session);
        opts.set_inflight(config.max_inflight);

        if let Some(max_packet_size) = config.max_packet_size {
            opts.set_max_packet_size(max_packet_size as usize, max_packet_size as usize);
        }

        if let Some(username) = &config.username {
            opts.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let cap = config.request_channel_capacity.unwrap_or(64).max(1) as usize;

        let tls_config = config.tls.clone().filter(TlsConfig::is_enabled);

        Ok(Self {
            opts,
            cap,
            connection_timeout: config.connection_timeout,
            tls_config,
        })
    }

    /// Registers the Last Will: `payload` on `topic`, QoS 1, retained.
    ///
    /// The broker publishes it when the session ends without a DISCONNECT.
    pub fn set_last_will(mut self, topic: &str, payload: &str) -> Self {
        let last_will = LastWill::new(
            topic,
            payload.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        self.opts.set_last_will(last_will);
        self
    }

    fn load_file(path: &str) -> Result<Vec<u8>, TransferError> {
        Ok(fs::read(path)?)
    }

    /// Loads certificates from disk into a TLS transport.
    fn build_tls_transport(tls_config: &TlsConfig) -> Result<Transport, TransferError> {
        tls_config
            .validate_config()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {}", e)))?;

        if tls_config.needs_custom_verifier() {
            return Ok(Transport::Tls(tls::rustls_configuration(tls_config)?));
        }

        let ca_path = tls_config
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("CA certificate path is required".into()))?;
        let ca = Self::load_file(ca_path)?;

        let client_auth = match (
            tls_config.client_cert_path.as_deref(),
            tls_config.client_key_path.as_deref(),
        ) {
            (Some(cert), Some(key)) => Some((Self::load_file(cert)?, Self::load_file(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    /// Constructs the client and its event loop, consuming the builder.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let transport = match &self.tls_config {
            Some(tls_config) => Self::build_tls_transport(tls_config)?,
            None => Transport::Tcp,
        };

        let mut opts = self.opts;
        opts.set_transport(transport);

        let (client, mut event_loop) = AsyncClient::new(opts, self.cap);
        event_loop
            .network_options
            .set_connection_timeout(self.connection_timeout);

        Ok((client, event_loop))
    }
}

fn non_empty_client_id(client_id: String) -> String {
    if client_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        client_id
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::tls::tests::{write, CA_PEM, LEAF_KEY_PEM, LEAF_PEM};

    fn config_with_tls(tls: TlsConfig) -> Config {
        Config {
            host: "broker.test".into(),
            port: 8883,
            client_id: "cam-01".into(),
            tls: Some(tls),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_client_id_becomes_uuid() {
        let builder = ClientBuilder::from_config(&Config::default()).unwrap();
        assert_eq!(builder.opts.client_id().len(), 36);
    }

    #[test]
    fn test_from_config_applies_inflight_and_last_will() {
        let config = Config {
            client_id: "cam".into(),
            max_inflight: 20,
            ..Default::default()
        };
        let builder = ClientBuilder::from_config(&config)
            .unwrap()
            .set_last_will(&config.status_topic(), "0");

        assert_eq!(builder.opts.inflight(), 20);
        let will = builder.opts.last_will().expect("last will set");
        assert_eq!(will.topic, "status/online");
        assert_eq!(&will.message[..], b"0");
        assert!(will.retain);
        assert_eq!(will.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_build_from_config() {
        let config = Config {
            host: "localhost".to_string(),
            client_id: "cam-01".to_string(),
            username: Some("cam".into()),
            password: Some("secret".into()),
            ..Default::default()
        };

        let builder = ClientBuilder::from_config(&config).unwrap();
        assert_eq!(builder.cap, 64);
        assert_eq!(builder.opts.inflight(), 20);
        assert_eq!(
            builder.opts.credentials(),
            Some(("cam".to_string(), "secret".to_string()))
        );
        assert!(builder.tls_config.is_none());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_build_from_config_invalid() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };
        assert!(ClientBuilder::from_config(&config).is_err());
    }

    #[test]
    fn test_disabled_tls_section_stays_plain() {
        let builder = ClientBuilder::from_config(&config_with_tls(TlsConfig::default())).unwrap();
        assert!(builder.tls_config.is_none());
    }

    #[test]
    fn test_build_tls_client_with_client_auth() {
        let dir = TempDir::new().unwrap();
        let config = config_with_tls(TlsConfig {
            ca_cert_path: Some(write(dir.path(), "ca.pem", CA_PEM)),
            client_cert_path: Some(write(dir.path(), "client.pem", LEAF_PEM)),
            client_key_path: Some(write(dir.path(), "client.key", LEAF_KEY_PEM)),
            ..Default::default()
        });

        let builder = ClientBuilder::from_config(&config).unwrap();
        assert!(builder.tls_config.is_some());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_build_tls_client_without_client_auth() {
        let dir = TempDir::new().unwrap();
        let config = config_with_tls(TlsConfig {
            ca_cert_path: Some(write(dir.path(), "ca.pem", CA_PEM)),
            ..Default::default()
        });

        assert!(ClientBuilder::from_config(&config).unwrap().build().is_ok());
    }

    #[test]
    fn test_build_tls_client_insecure() {
        let dir = TempDir::new().unwrap();
        let config = config_with_tls(TlsConfig {
            insecure: true,
            ca_cert_path: Some(write(dir.path(), "ca.pem", CA_PEM)),
            ..Default::default()
        });

        assert!(ClientBuilder::from_config(&config).unwrap().build().is_ok());
    }

    #[test]
    fn test_build_tls_missing_ca() {
        let config = config_with_tls(TlsConfig {
            ca_cert_path: Some("/nonexistent/ca.crt".into()),
            ..Default::default()
        });

        assert!(ClientBuilder::from_config(&config).unwrap().build().is_err());
    }
}
