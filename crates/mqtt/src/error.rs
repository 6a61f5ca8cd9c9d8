//! Error type for the MQTT transport.
//!
//! `TransferError` groups failures by what the caller can do about them:
//!
//! **Setup** (fatal at startup): `ClientSetup`, `ConfigError`, `Io`.
//!
//! **Publish** (the message should go to the spool): `NotConnected`,
//! `AckTimeout`, `LinkLost`, `ClientTransfer`, `InvalidMetadata`.
//!
//! **Link** (handled inside the connection kernel, surfaced as state):
//! `ClientConnection`, `ConnectionKernel`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Publish parameters rejected before reaching the client (bad QoS).
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Client could not be constructed (TLS material, options).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Connection kernel task failed or could not be joined.
    #[error("Connection kernel error: {0}")]
    ConnectionKernel(String),

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request channel refused the publish (full or closed).
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Network-level connection error from the event loop.
    #[error("Client connection error: {0}")]
    ClientConnection(Box<rumqttc::ConnectionError>),

    /// Publish attempted while the link is down.
    #[error("Not connected to broker")]
    NotConnected,

    /// The broker did not acknowledge in time.
    #[error("No acknowledgement within {0} ms")]
    AckTimeout(u64),

    /// The link dropped while the publish was waiting for its acknowledgement.
    #[error("Connection lost before acknowledgement")]
    LinkLost,

    /// File I/O (TLS certificate loading).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True for failures where the message never reached the broker for sure
    /// and should be kept for replay.
    pub fn is_publish_failure(&self) -> bool {
        matches!(
            self,
            TransferError::NotConnected
                | TransferError::AckTimeout(_)
                | TransferError::LinkLost
                | TransferError::ClientTransfer(_)
        )
    }
}

/// Boxes the large `ConnectionError` so `TransferError` stays small.
impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
