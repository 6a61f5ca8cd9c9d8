//! Suppresses repeated detection events.
//!
//! A detection is reduced to a [`Signature`]: the face count plus how many
//! times each label appears. An event is emitted when the signature changes,
//! or when the same signature persists past the cooldown.

use std::{collections::BTreeMap, fmt, time::Duration};

use sha1::{Digest, Sha1};
use tokio::time::Instant;

use super::vision::DetectionResult;

/// SHA-1 hex digest of `faces:<n>|<label>:<count>|...`, labels ascending.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn of(result: &DetectionResult) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for detection in &result.detections {
            *counts.entry(detection.label.as_str()).or_default() += 1;
        }

        let mut canonical = format!("faces:{}", result.faces);
        for (label, count) in counts {
            canonical.push_str(&format!("|{label}:{count}"));
        }
        Signature::digest(&canonical)
    }

    /// Signature of a capture with nothing in it.
    pub fn empty() -> Self {
        Signature::digest("faces:0")
    }

    fn digest(canonical: &str) -> Self {
        let hash = Sha1::digest(canonical.as_bytes());
        Signature(hash.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct EventDebouncer {
    cooldown: Duration,
    last_signature: Option<Signature>,
    last_event_at: Option<Instant>,
}

impl EventDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        EventDebouncer {
            cooldown,
            last_signature: None,
            last_event_at: None,
        }
    }

    /// Decides whether `signature` observed at `now` becomes an event.
    ///
    /// The signature is remembered either way; the event time only moves
    /// when the answer is `true`.
    pub fn should_emit(&mut self, signature: &Signature, now: Instant) -> bool {
        let changed = self.last_signature.as_ref() != Some(signature);
        let cooled = self
            .last_event_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.cooldown);

        self.last_signature = Some(signature.clone());
        let emit = changed || cooled;
        if emit {
            self.last_event_at = Some(now);
        }
        emit
    }

    /// Remembers `signature` without emitting.
    pub fn reset(&mut self, signature: Signature) {
        self.last_signature = Some(signature);
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
