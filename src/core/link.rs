//! Link view of the transport state.
//!
//! The transport broadcasts a detailed [`ConnectionState`] through a
//! `watch` channel. The delivery core only cares whether the broker is
//! reachable, so every state other than `Connected` collapses into
//! [`LinkState::Disconnected`].

use std::fmt;

use edgewatch_mqtt::ConnectionState;
use tokio::sync::watch;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// CONNACK accepted.
    Connected,
    /// Anything else, with a reason for the logs.
    Disconnected(String),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

impl From<&ConnectionState> for LinkState {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => LinkState::Connected,
            ConnectionState::Disconnected(reason) => LinkState::Disconnected(reason.clone()),
            ConnectionState::Reconnecting(secs) => {
                LinkState::Disconnected(format!("reconnecting in {:.1} sec", secs))
            }
            ConnectionState::Connecting => LinkState::Disconnected("connecting".to_string()),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connected => write!(f, "Connected"),
            LinkState::Disconnected(reason) => write!(f, "Disconnected: {}", reason),
        }
    }
}

/// Turns transport state notifications into link transitions.
///
/// Every notification whose value is `Connected` is reported: the transport
/// only sends real changes, so two `Connected` notifications in a row mean
/// the link dropped and came back in between. Consecutive non-connected
/// states are folded into one `Disconnected` transition.
#[derive(Debug)]
pub struct LinkMonitor {
    rx: watch::Receiver<ConnectionState>,
    last: LinkState,
    primed: bool,
}

impl LinkMonitor {
    pub fn new(rx: watch::Receiver<ConnectionState>) -> Self {
        LinkMonitor {
            rx,
            last: LinkState::Disconnected("starting".to_string()),
            primed: false,
        }
    }

    /// Waits for the next transition. `None` once the transport is gone.
    ///
    /// If the link is already up on the first call, that counts as a
    /// transition into `Connected`.
    pub async fn next_transition(&mut self) -> Option<LinkState> {
        if !self.primed {
            self.primed = true;
            let state = LinkState::from(&*self.rx.borrow_and_update());
            if state.is_connected() {
                self.last = state.clone();
                return Some(state);
            }
        }

        loop {
            if self.rx.changed().await.is_err() {
                debug!("Transport state channel closed");
                return None;
            }
            let conn_state = self.rx.borrow_and_update().clone();
            let state = LinkState::from(&conn_state);
            trace!("Transport state {} -> link {}", conn_state, state);

            if state.is_connected() || self.last.is_connected() {
                self.last = state.clone();
                return Some(state);
            }
        }
    }
}
