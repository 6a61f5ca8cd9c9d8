//! Connection kernel: drives the rumqttc event loop and owns the link state.
//!
//! ```text
//! Publisher ──try_publish──► AsyncClient ──request channel──► EventLoop
//!                                                               │ poll()
//!                                      ConnectionKernel ◄───────┘
//!                                        ├─ watch<ConnectionState>  (single writer)
//!                                        ├─ AtomicBool is_connected (fast path)
//!                                        ├─ AckTracker              (PUBACK/PUBREC/PUBCOMP)
//!                                        └─ Backoff                 (floor..ceiling)
//! ```
//!
//! The kernel runs on one task. It never gives up on the broker: transient
//! errors back off exponentially, refusals that retrying will not fix soon
//! (credentials, TLS) wait at the ceiling. Only cancellation ends the loop.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ack::AckTracker, backoff::Backoff, state::ConnectionState};

/// How long a graceful DISCONNECT may take to reach the wire.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub struct ConnectionKernel {
    client: AsyncClient,

    event_loop: EventLoop,

    /// Set on CONNACK, cleared on any link loss.
    is_connected: Arc<AtomicBool>,

    backoff: Backoff,

    acks: Arc<AckTracker>,

    cancel: CancellationToken,

    state_tx: watch::Sender<ConnectionState>,

    /// Kept so sends never fail for lack of receivers.
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionKernel {
    /// Creates a kernel in the `Connecting` state, not yet polling.
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        acks: Arc<AckTracker>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            is_connected: Arc::new(AtomicBool::new(false)),
            backoff,
            acks,
            cancel,
            state_tx,
            state_rx,
        }
    }

    /// Subscribes to connection state changes.
    ///
    /// The receiver sees the current value immediately and is notified only
    /// when the value actually changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Shared connected flag, for callers that cannot await a channel.
    pub fn is_connected(&self) -> Arc<AtomicBool> {
        self.is_connected.clone()
    }

    /// Broadcasts `state` if it differs from the current one.
    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });

        if changed {
            info!("Connection state changed to: {}", state);
        }
    }

    /// Runs the event loop until cancelled.
    ///
    /// - CONNACK accepted: connected flag set, backoff reset, `Connected`
    ///   broadcast.
    /// - Poll error: waiters failed, `Disconnected(reason)` then
    ///   `Reconnecting(delay)` broadcast, sleep, try again.
    /// - Cancellation: graceful DISCONNECT (bounded), return.
    pub async fn reconnect(&mut self) {
        self.update_state(ConnectionState::Connecting);
        self.backoff.reset();

        info!("Starting connection event loop...");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, closing connection...");
                    self.disconnect().await;
                    info!("Connection kernel shutdown completed");
                    return;
                }

                event_result = self.event_loop.poll() => {
                    match event_result {
                        Ok(event) => self.handle_event(event),
                        Err(ConnectionError::RequestsDone) => {
                            info!("All client handles dropped, stopping connection kernel");
                            self.on_link_lost("client dropped".into());
                            return;
                        }
                        Err(e) => {
                            let reason = get_error_message(&e);
                            self.on_link_lost(reason.clone());

                            let delay = match classify_connection_error(&e) {
                                Disposition::Fatal => {
                                    error!("Broker refused connection: {}", reason);
                                    debug!("Refusal details: {e:?}");
                                    self.backoff.saturate()
                                }
                                Disposition::Reconnect => self.backoff.next_sleep(),
                            };

                            warn!(
                                "Reconnecting in {:.2} seconds (attempt {}) due to error: {}",
                                delay.as_secs_f64(),
                                self.backoff.attempt(),
                                reason
                            );
                            self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));

                            tokio::select! {
                                _ = self.cancel.cancelled() => {
                                    info!("Shutdown requested while waiting to reconnect");
                                    return;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            self.update_state(ConnectionState::Connecting);
                        }
                    }
                }
            }
        }
    }

    /// Applies one event-loop event to the link state and the ack tracker.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(conn_ack) => {
                    if conn_ack.code == ConnectReturnCode::Success {
                        info!(
                            "Connection established (session present: {})",
                            conn_ack.session_present
                        );
                        self.backoff.reset();
                        self.is_connected.store(true, Ordering::Release);
                        self.update_state(ConnectionState::Connected);
                    } else {
                        warn!("CONNACK refused: {:?}", conn_ack.code);
                    }
                }
                Packet::PubAck(ack) => self.acks.on_puback(ack.pkid),
                Packet::PubRec(rec) => self.acks.on_pubrec(rec.pkid),
                Packet::PubComp(comp) => self.acks.on_pubcomp(comp.pkid),
                Packet::PingResp | Packet::PingReq => {}
                Packet::Disconnect => {
                    warn!("Disconnected by broker");
                    self.on_link_lost("Disconnected by broker".into());
                }
                other => trace!("Incoming packet: {:?}", other),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => self.acks.on_outgoing_publish(pkid),
            Event::Outgoing(Outgoing::AwaitAck(pkid)) => self.acks.on_await_ack(pkid),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {:?}", outgoing),
        }
    }

    fn on_link_lost(&mut self, reason: String) {
        self.is_connected.store(false, Ordering::Release);
        self.acks.fail_all();
        self.update_state(ConnectionState::Disconnected(reason));
    }

    /// Sends DISCONNECT and polls until it is written, within a grace period.
    ///
    /// A clean DISCONNECT keeps the broker from firing the last will.
    async fn disconnect(&mut self) {
        let was_connected = self.is_connected.swap(false, Ordering::AcqRel);
        if was_connected {
            if let Err(e) = self.client.try_disconnect() {
                warn!("Error sending disconnect packet: {:?}", e);
            } else {
                let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
                    loop {
                        match self.event_loop.poll().await {
                            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                            Ok(event) => self.handle_event(event),
                            Err(_) => break,
                        }
                    }
                })
                .await;
                if flushed.is_err() {
                    warn!("DISCONNECT not written within {:?}", DISCONNECT_GRACE);
                }
            }
        }
        self.is_connected.store(false, Ordering::Release);
        self.acks.fail_all();
        self.update_state(ConnectionState::Disconnected("shutdown".into()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // Retrying will not help soon; wait at the ceiling.
    Fatal,
    // Temporary; normal backoff.
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Certificates or crypto setup.
        ConnectionError::Tls(_) => Fatal,

        // Protocol-level failures.
        ConnectionError::MqttState(_) => Reconnect,
        ConnectionError::NotConnAck(_) => Fatal,

        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            ConnectReturnCode::ServiceUnavailable => Reconnect,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

/// Innermost message of an error chain, without surrounding quotes.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    let msg = current.to_string();
    msg.trim_matches('"').to_string()
}
