//! Periodic confirmation sweep

use chrono::{DateTime, Utc};
use ihc_sync::{SharedSyncEngine, SweepOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::actions::{EscalationRequest, RestartReason};

/// Expires overdue writes on a fixed interval and queues a service restart
/// when the escalation window fills up
pub struct SweepTask {
    engine: SharedSyncEngine,
    interval: Duration,
    running: Arc<AtomicBool>,
    escalation: mpsc::Sender<EscalationRequest>,
}

impl SweepTask {
    pub fn new(
        engine: SharedSyncEngine,
        interval: Duration,
        running: Arc<AtomicBool>,
        escalation: mpsc::Sender<EscalationRequest>,
    ) -> Self {
        Self {
            engine,
            interval,
            running,
            escalation,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // paused while the host restart tears things down
            if self.running.load(Ordering::SeqCst) {
                self.tick(Utc::now());
            }
        }
        debug!("Sweep task stopped");
    }

    /// One sweep at `now`
    pub fn tick(&self, now: DateTime<Utc>) -> SweepOutcome {
        let outcome = self.engine.sweep(now);
        if let Some(trigger) = outcome.trigger {
            warn!(failures = trigger.failures, "Confirmation failures crossed the threshold");
            let request = EscalationRequest::ServiceRestart(RestartReason::Escalation {
                failures: trigger.failures,
            });
            if let Err(e) = self.escalation.try_send(request) {
                warn!("Service restart not queued: {}", e);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ihc_core::DeviceKey;
    use ihc_sync::SyncEngine;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_trigger_queues_service_restart() {
        let engine = Arc::new(SyncEngine::default());
        let (tx, mut rx) = mpsc::channel(4);
        let sweep = SweepTask::new(
            engine.clone(),
            Duration::from_secs(1),
            Arc::new(AtomicBool::new(true)),
            tx,
        );

        for (io, at) in [(1, 0), (2, 50), (3, 100)] {
            engine.register(DeviceKey::new(1, io), true, t(at));
            sweep.tick(t(at + 11));
        }

        assert_eq!(
            rx.try_recv().unwrap(),
            EscalationRequest::ServiceRestart(RestartReason::Escalation { failures: 3 })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_paused_sweep_leaves_entries() {
        let engine = Arc::new(SyncEngine::default());
        engine.register(DeviceKey::new(1, 1), true, Utc::now() - chrono::Duration::seconds(60));
        let running = Arc::new(AtomicBool::new(false));
        let (tx, _rx) = mpsc::channel(4);
        let sweep = SweepTask::new(engine.clone(), Duration::from_millis(5), running.clone(), tx);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.pending_count(), 1);

        running.store(true, Ordering::SeqCst);
        while engine.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        task.await.unwrap();
    }
}
