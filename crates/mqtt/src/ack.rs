//! Acknowledgement tracking for publishes that need a bounded wait.
//!
//! rumqttc's `AsyncClient` only enqueues; the packet id is assigned later by
//! the event loop and reported as `Outgoing::Publish(pkid)`. Requests leave
//! the channel in the order they were enqueued, so the tracker pairs waiters
//! with outgoing events first-in first-out and then with the broker's
//! PUBACK/PUBCOMP by packet id.
//!
//! ```text
//! publish_tracked ──► [waiting for pkid] ──Outgoing::Publish(pkid)──► [waiting for ack]
//!                                                                        │
//!                                        PubAck/PubComp(pkid) ◄──────────┘
//! ```
//!
//! When the link drops every waiter is failed, but rumqttc keeps the packets:
//! unacknowledged publishes keep their packet id and requests still in the
//! channel are queued behind them. All of it is written again after the next
//! CONNACK whether or not the broker resumed the session. The tracker
//! remembers those packets so their `Outgoing::Publish` events and acks are
//! never credited to a later waiter.
//!
//! A packet id that is still occupied makes rumqttc park the new publish
//! (`Outgoing::AwaitAck`) and write it when the occupant is acknowledged. The
//! write is reported before the ack that released the id, so the parked
//! waiter is registered only once that ack has been applied.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, PoisonError},
};

use rumqttc::{AsyncClient, QoS};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::error::TransferError;

/// Resolves to `true` once the broker acknowledged, `false` if the link dropped.
pub type AckReceiver = oneshot::Receiver<bool>;

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<bool>,
    qos: QoS,
    /// PUBREC seen; a QoS 2 publish that only needs its PUBCOMP.
    released: bool,
}

impl Waiter {
    fn resolve(self, acked: bool) {
        let _ = self.tx.send(acked);
    }

    /// Whether an outgoing event with this packet id can be ours.
    fn matches(&self, pkid: u16) -> bool {
        (pkid == 0) == (self.qos == QoS::AtMostOnce)
    }
}

#[derive(Debug, Default)]
struct Pending {
    /// Enqueued, packet id not known yet. FIFO.
    unassigned: VecDeque<Waiter>,

    /// Written to the network, waiting for PUBACK/PUBCOMP.
    by_pkid: HashMap<u16, Waiter>,

    /// Requests that were still queued when the link dropped. rumqttc
    /// writes them later without a waiter.
    stale: usize,

    /// Packet ids rumqttc holds for a publish nobody waits for. Its
    /// retransmissions are skipped until the broker acknowledges it.
    orphans: HashSet<u16>,

    /// The publish parked on an occupied packet id, if any.
    parked: Option<(u16, Option<Waiter>)>,

    /// Parked publishes already written, registered once the ack that
    /// freed their packet id has been applied.
    after_ack: HashMap<u16, Option<Waiter>>,
}

impl Pending {
    /// Takes the waiter for the next request leaving the channel, or `None`
    /// when that request is one queued before the link dropped.
    fn next_owner(&mut self) -> Option<Option<Waiter>> {
        if self.stale > 0 {
            self.stale -= 1;
            return Some(None);
        }
        self.unassigned.pop_front().map(Some)
    }

    fn hold(&mut self, pkid: u16, owner: Option<Waiter>) {
        match owner {
            Some(waiter) => {
                if let Some(previous) = self.by_pkid.insert(pkid, waiter) {
                    previous.resolve(false);
                }
            }
            None => {
                self.orphans.insert(pkid);
            }
        }
    }

    /// Registers a parked publish whose packet id was just freed.
    fn release_parked(&mut self, pkid: u16) {
        if let Some(owner) = self.after_ack.remove(&pkid) {
            self.hold(pkid, owner);
        }
    }
}

/// Pairs client publishes with their broker acknowledgements.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: Mutex<Pending>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a publish and returns a receiver for its acknowledgement.
    ///
    /// The lock is held across `try_publish` so the waiter order matches the
    /// request channel order. `try_publish` never blocks: a full channel is
    /// reported as an error instead of stalling the caller.
    pub fn publish_tracked(
        &self,
        client: &AsyncClient,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<AckReceiver, TransferError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        client.try_publish(topic, qos, retain, payload)?;
        pending.unassigned.push_back(Waiter {
            tx,
            qos,
            released: false,
        });
        Ok(rx)
    }

    /// The event loop wrote a PUBLISH. `pkid == 0` means QoS 0, which is done
    /// as soon as it is on the wire.
    pub fn on_outgoing_publish(&self, pkid: u16) {
        let mut pending = self.lock();

        if pending.parked.as_ref().is_some_and(|(parked, _)| *parked == pkid) {
            if let Some((_, owner)) = pending.parked.take() {
                pending.after_ack.insert(pkid, owner);
            }
            return;
        }
        if pkid != 0 && pending.orphans.contains(&pkid) {
            trace!("Retransmitted publish {} has no waiter", pkid);
            return;
        }

        let mismatch = pending.stale == 0
            && pending
                .unassigned
                .front()
                .is_some_and(|front| !front.matches(pkid));
        if mismatch {
            debug!("Outgoing publish {} does not match the next waiter", pkid);
            if pkid != 0 {
                pending.orphans.insert(pkid);
            }
            return;
        }

        match pending.next_owner() {
            Some(Some(waiter)) if pkid == 0 => waiter.resolve(true),
            Some(owner) if pkid != 0 => pending.hold(pkid, owner),
            Some(_) => trace!("Skipping QoS 0 publish queued before link loss"),
            None => {
                trace!("Outgoing publish {} without a tracked waiter", pkid);
                if pkid != 0 {
                    pending.orphans.insert(pkid);
                }
            }
        }
    }

    /// The next request collided with an unacknowledged packet id and is
    /// parked until that id is acknowledged.
    pub fn on_await_ack(&self, pkid: u16) {
        let mut pending = self.lock();
        let owner = pending.next_owner().flatten();
        trace!("Publish parked on packet id {}", pkid);
        if let Some((_, Some(previous))) = pending.parked.replace((pkid, owner)) {
            previous.resolve(false);
        }
    }

    /// PUBACK received (QoS 1).
    pub fn on_puback(&self, pkid: u16) {
        let mut pending = self.lock();
        pending.orphans.remove(&pkid);
        if pending
            .by_pkid
            .get(&pkid)
            .is_some_and(|waiter| waiter.qos == QoS::AtLeastOnce)
        {
            if let Some(waiter) = pending.by_pkid.remove(&pkid) {
                waiter.resolve(true);
            }
        }
        pending.release_parked(pkid);
    }

    /// PUBREC received (QoS 2, first half). The publish slot is free again
    /// and a lost link replays PUBREL, not the PUBLISH.
    pub fn on_pubrec(&self, pkid: u16) {
        let mut pending = self.lock();
        pending.orphans.remove(&pkid);
        if let Some(waiter) = pending.by_pkid.get_mut(&pkid) {
            waiter.released = true;
        }
    }

    /// PUBCOMP received (QoS 2 done).
    pub fn on_pubcomp(&self, pkid: u16) {
        let mut pending = self.lock();
        if pending
            .by_pkid
            .get(&pkid)
            .is_some_and(|waiter| waiter.qos == QoS::ExactlyOnce)
        {
            if let Some(waiter) = pending.by_pkid.remove(&pkid) {
                waiter.resolve(true);
            }
        }
        pending.release_parked(pkid);
    }

    /// The link dropped: fail every waiter and remember what will come back
    /// through the event loop without a waiter.
    pub fn fail_all(&self) {
        let mut pending = self.lock();

        let queued = pending.unassigned.len();
        pending.stale += queued;
        for waiter in pending.unassigned.drain(..) {
            waiter.resolve(false);
        }

        let written: Vec<(u16, Waiter)> = pending.by_pkid.drain().collect();
        for (pkid, waiter) in written {
            if !waiter.released {
                pending.orphans.insert(pkid);
            }
            waiter.resolve(false);
        }

        if let Some((_, owner)) = pending.parked.as_mut() {
            if let Some(waiter) = owner.take() {
                waiter.resolve(false);
            }
        }
        let parked_written: Vec<u16> = pending.after_ack.keys().copied().collect();
        for pkid in parked_written {
            if let Some(Some(waiter)) = pending.after_ack.insert(pkid, None) {
                waiter.resolve(false);
            }
        }
    }

    /// Number of publishes still waiting (enqueued or inflight).
    pub fn waiting(&self) -> usize {
        let pending = self.lock();
        let parked = pending
            .parked
            .iter()
            .map(|(_, owner)| owner)
            .chain(pending.after_ack.values())
            .filter(|owner| owner.is_some())
            .count();
        pending.unassigned.len() + pending.by_pkid.len() + parked
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
