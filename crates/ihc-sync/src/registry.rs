//! Pending write confirmations
//!
//! Every output write that the controller accepted is tracked here until the
//! event stream reports the expected state, or until a sweep finds it older
//! than the confirmation timeout.

use chrono::{DateTime, Utc};
use ihc_core::DeviceKey;
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

/// One outstanding write awaiting confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub key: DeviceKey,
    pub expected_state: bool,
    pub submitted_at: DateTime<Utc>,
}

impl PendingConfirmation {
    /// Age of the entry at `now`; a clock that stepped backwards yields zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }
}

/// Outstanding writes keyed by device, at most one per key
#[derive(Debug, Default)]
pub struct ConfirmationRegistry {
    pending: HashMap<DeviceKey, PendingConfirmation>,
}

impl ConfirmationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a write, replacing any earlier expectation for the same key
    ///
    /// Returns the superseded entry, if there was one.
    pub fn register(
        &mut self,
        key: DeviceKey,
        expected_state: bool,
        now: DateTime<Utc>,
    ) -> Option<PendingConfirmation> {
        trace!(device = %key, expected_state, "Registering pending confirmation");
        self.pending.insert(
            key,
            PendingConfirmation {
                key,
                expected_state,
                submitted_at: now,
            },
        )
    }

    /// Clear the entry for `key` if it expects `observed_state`
    ///
    /// Returns false and leaves the registry untouched when there is no entry
    /// or the observed state differs (a late or unrelated report).
    pub fn try_confirm(&mut self, key: DeviceKey, observed_state: bool, now: DateTime<Utc>) -> bool {
        match self.pending.get(&key) {
            Some(entry) if entry.expected_state == observed_state => {
                trace!(device = %key, latency = ?entry.age(now), "Write confirmed");
                self.pending.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every entry older than `timeout`
    pub fn sweep_expired(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<PendingConfirmation> {
        let expired: Vec<DeviceKey> = self
            .pending
            .values()
            .filter(|entry| entry.age(now) > timeout)
            .map(|entry| entry.key)
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect()
    }

    pub fn get(&self, key: DeviceKey) -> Option<&PendingConfirmation> {
        self.pending.get(&key)
    }

    pub fn contains(&self, key: DeviceKey) -> bool {
        self.pending.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
