//! Sliding-window escalation of confirmation timeouts
//!
//! Each timed-out write adds a timestamp to the failure window. Once the
//! window holds `threshold` failures younger than `window`, a restart is
//! triggered and the window is cleared, so the next restart needs a fresh
//! burst of failures.

use chrono::{DateTime, Utc};
use ihc_core::DeviceKey;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Threshold and span of the failure window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub threshold: usize,
    pub window: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(300),
        }
    }
}

/// Emitted when the failure window crosses the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartTrigger {
    /// Failures in the window at the moment of triggering
    pub failures: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct EscalationController {
    policy: EscalationPolicy,
    window: VecDeque<DateTime<Utc>>,
}

impl EscalationController {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            window: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    /// Record a batch of timeouts observed at `now`
    ///
    /// The threshold is checked once after the whole batch is recorded, so a
    /// single call yields at most one trigger.
    pub fn on_timeouts(&mut self, expired: &[DeviceKey], now: DateTime<Utc>) -> Option<RestartTrigger> {
        if expired.is_empty() {
            return None;
        }

        for key in expired {
            debug!(device = %key, "Recording confirmation timeout");
            self.window.push_back(now);
            self.prune(now);
        }

        let failures = self.window.len();
        if failures >= self.policy.threshold {
            self.window.clear();
            Some(RestartTrigger { failures, at: now })
        } else {
            None
        }
    }

    /// Drop timestamps that are at least `window` old
    fn prune(&mut self, now: DateTime<Utc>) {
        let span = self.policy.window;
        self.window
            .retain(|t| (now - *t).to_std().unwrap_or_default() < span);
    }

    /// Failures currently counted in the window
    pub fn failures(&self) -> usize {
        self.window.len()
    }
}
