//! Connection state broadcast by the connection kernel.
//!
//! The kernel is the only writer; everyone else holds a
//! `tokio::sync::watch::Receiver<ConnectionState>`. The kernel only sends when
//! the value actually changes, so a receiver that wakes up and sees
//! `Connected` knows a fresh CONNACK has been accepted.

use std::fmt;

/// Represents the current state of the MQTT link.
///
/// Lifecycle:
/// - `Connecting` -> `Connected` (CONNACK accepted)
/// - `Connected` -> `Disconnected` (broker closed, network error, ...)
/// - `Disconnected` -> `Reconnecting` -> `Connecting` -> ... (backoff loop)
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent (or about to be), waiting for CONNACK.
    Connecting,

    /// CONNACK accepted. The only state in which publishes can succeed.
    Connected,

    /// Link lost. Carries a human-readable reason.
    Disconnected(String),

    /// Sleeping before the next attempt. Carries the delay in seconds.
    Reconnecting(f64),
}

impl ConnectionState {
    /// Short static name of the state, for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// Context for the state: the disconnect reason or the pending delay.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting => String::new(),
            ConnectionState::Connected => String::new(),
            ConnectionState::Disconnected(reason) => reason.clone(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
        }
    }

    /// True only for [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(ConnectionState::Connecting.as_str(), "Connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "Connected");
        assert_eq!(
            ConnectionState::Disconnected("test".into()).as_str(),
            "Disconnected"
        );
        assert_eq!(ConnectionState::Reconnecting(1.0).as_str(), "Reconnecting");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Reconnecting(2.0).to_string(),
            "Reconnecting (in 2 seconds)"
        );
        assert_eq!(
            ConnectionState::Disconnected("broker closed".into()).to_string(),
            "Disconnected (broker closed)"
        );
    }

    #[test]
    fn test_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected("error".into()).is_connected());
        assert!(!ConnectionState::Reconnecting(1.0).is_connected());
    }
}
