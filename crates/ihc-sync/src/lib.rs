//! State synchronization and failure escalation for the IHC bridge
//!
//! This crate provides the [`SyncEngine`], the only piece of the bridge with
//! shared mutable state. It combines:
//! - the [`ConfirmationRegistry`], tracking writes until the controller
//!   reports the expected state
//! - the [`EscalationController`], turning repeated confirmation timeouts into
//!   a restart trigger
//!
//! Both live behind one mutex, since a confirmation from the event stream and
//! a timeout sweep can race on the same key. Callers pass `now` explicitly.

mod escalation;
mod registry;

pub use escalation::{EscalationController, EscalationPolicy, RestartTrigger};
pub use registry::{ConfirmationRegistry, PendingConfirmation};

use chrono::{DateTime, Utc};
use ihc_core::DeviceKey;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Tuning of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub confirmation_timeout: Duration,
    pub escalation: EscalationPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(10),
            escalation: EscalationPolicy::default(),
        }
    }
}

/// Result of one periodic sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired: Vec<PendingConfirmation>,
    pub trigger: Option<RestartTrigger>,
}

#[derive(Debug)]
struct SyncState {
    registry: ConfirmationRegistry,
    escalation: EscalationController,
}

/// Registry and failure window under a single lock
#[derive(Debug)]
pub struct SyncEngine {
    state: Mutex<SyncState>,
    confirmation_timeout: Duration,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            state: Mutex::new(SyncState {
                registry: ConfirmationRegistry::new(),
                escalation: EscalationController::new(config.escalation),
            }),
            confirmation_timeout: config.confirmation_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // The state stays consistent across a panicking holder: every
        // mutation is a single map or deque operation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track an accepted write
    pub fn register(&self, key: DeviceKey, expected_state: bool, now: DateTime<Utc>) {
        if let Some(prior) = self.lock().registry.register(key, expected_state, now) {
            debug!(
                device = %key,
                superseded_state = prior.expected_state,
                "Newer command supersedes pending confirmation"
            );
        }
    }

    /// Clear a pending write if the reported state matches its expectation
    pub fn try_confirm(&self, key: DeviceKey, observed_state: bool, now: DateTime<Utc>) -> bool {
        self.lock().registry.try_confirm(key, observed_state, now)
    }

    /// Expire old writes and feed them to the escalation window
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut state = self.lock();
        let expired = state
            .registry
            .sweep_expired(now, self.confirmation_timeout);
        if expired.is_empty() {
            return SweepOutcome::default();
        }

        for entry in &expired {
            warn!(
                device = %entry.key,
                expected = if entry.expected_state { "ON" } else { "OFF" },
                "No state confirmation received"
            );
        }

        let keys: Vec<DeviceKey> = expired.iter().map(|e| e.key).collect();
        let trigger = state.escalation.on_timeouts(&keys, now);
        SweepOutcome { expired, trigger }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn is_pending(&self, key: DeviceKey) -> bool {
        self.lock().registry.contains(key)
    }

    /// Failures currently counted toward the next restart
    pub fn recent_failures(&self) -> usize {
        self.lock().escalation.failures()
    }

    pub fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

/// Thread-safe handle shared by the relay, the ingress and the sweep tick
pub type SharedSyncEngine = Arc<SyncEngine>;
