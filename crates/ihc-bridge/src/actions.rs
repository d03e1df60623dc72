//! Escalation actions
//!
//! Requests arrive over a channel from the command ingress (manual restarts)
//! and the sweep tick (repeated confirmation timeouts). A single worker runs
//! them one after another.

use ihc_controller::CommandApi;
use ihc_core::{Namespace, SystemTopic};
use ihc_mqtt::SharedBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::relay::EventRelay;
use crate::supervisor::EventStreamSupervisor;
use crate::system::SystemActions;

/// Status notice published before the host reboots
pub const HOST_RESTART_NOTICE: &str = "Restarting Raspberry Pi in 10 seconds...";

/// Why the controller service is restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Manual,
    /// Too many confirmation timeouts inside the failure window
    Escalation { failures: usize },
}

/// A privileged action to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationRequest {
    ServiceRestart(RestartReason),
    HostRestart,
}

/// Delays used by the escalation actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTiming {
    /// Wait after a service restart before reconnecting
    pub restart_settle: Duration,
    pub probe_attempts: u32,
    pub probe_delay: Duration,
    /// Wait after the host restart notice and again after teardown
    pub host_notice_delay: Duration,
}

impl Default for ActionTiming {
    fn default() -> Self {
        Self {
            restart_settle: Duration::from_secs(10),
            probe_attempts: 5,
            probe_delay: Duration::from_secs(5),
            host_notice_delay: Duration::from_secs(5),
        }
    }
}

/// Runs service and host restarts against the live connections
pub struct EscalationActions {
    system: Arc<dyn SystemActions>,
    supervisor: Arc<EventStreamSupervisor>,
    bus: SharedBus,
    api: Arc<dyn CommandApi>,
    relay: Arc<EventRelay>,
    namespace: Namespace,
    running: Arc<AtomicBool>,
    timing: ActionTiming,
}

impl EscalationActions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        system: Arc<dyn SystemActions>,
        supervisor: Arc<EventStreamSupervisor>,
        bus: SharedBus,
        api: Arc<dyn CommandApi>,
        relay: Arc<EventRelay>,
        namespace: Namespace,
        running: Arc<AtomicBool>,
        timing: ActionTiming,
    ) -> Self {
        Self {
            system,
            supervisor,
            bus,
            api,
            relay,
            namespace,
            running,
            timing,
        }
    }

    /// Run requests until cancelled or every sender is gone
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<EscalationRequest>, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(?request, "Shutdown interrupted escalation action");
                    break;
                }
                _ = self.execute(request) => {}
            }
        }
        debug!("Escalation worker stopped");
    }

    pub async fn execute(&self, request: EscalationRequest) {
        match request {
            EscalationRequest::ServiceRestart(reason) => {
                self.restart_service(reason).await;
            }
            EscalationRequest::HostRestart => self.restart_host().await,
        }
    }

    /// Restart the controller service, then rebuild and verify the connections
    ///
    /// Returns whether the controller answered afterwards.
    #[instrument(skip(self))]
    pub async fn restart_service(&self, reason: RestartReason) -> bool {
        match reason {
            RestartReason::Manual => warn!("Restarting controller service on request"),
            RestartReason::Escalation { failures } => {
                warn!(failures, "Restarting controller service due to repeated failures")
            }
        }

        if let Err(e) = self.system.restart_service().await {
            error!("Error restarting controller service: {}", e);
            return false;
        }
        info!("Controller service restarted");

        tokio::time::sleep(self.timing.restart_settle).await;
        self.reset_connections().await
    }

    /// Rebuild the event stream and probe the command API until it answers
    pub async fn reset_connections(&self) -> bool {
        info!("Resetting connections after controller restart");
        self.supervisor.rebuild().await;

        let attempts = self.timing.probe_attempts;
        for attempt in 1..=attempts {
            match self.relay.sync_snapshot(self.api.as_ref()).await {
                Ok(count) => {
                    info!(states = count, "Reconnected to controller");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, attempts, "Reconnection attempt failed: {}", e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.timing.probe_delay).await;
            }
        }

        error!(attempts, "Failed to reconnect to controller");
        false
    }

    /// Announce, tear down both connections and reboot the host
    ///
    /// If the reboot command fails the bridge resumes normal operation.
    pub async fn restart_host(&self) {
        warn!("Initiating host restart");

        let status = self.namespace.system_topic(SystemTopic::Status);
        if let Err(e) = self.bus.publish(&status, HOST_RESTART_NOTICE, false).await {
            warn!("Failed to publish host restart notice: {}", e);
        }
        tokio::time::sleep(self.timing.host_notice_delay).await;

        self.running.store(false, Ordering::SeqCst);
        self.supervisor
            .shutdown(self.supervisor.settings().join_timeout)
            .await;
        self.bus.stop().await;
        tokio::time::sleep(self.timing.host_notice_delay).await;

        match self.system.restart_host().await {
            Ok(()) => info!("Host restart issued"),
            Err(e) => {
                error!("Error restarting host: {}", e);
                self.running.store(true, Ordering::SeqCst);
                if let Err(e) = self.bus.start().await {
                    error!("Failed to restart bus client: {}", e);
                }
                self.supervisor.reopen();
                self.reset_connections().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SupervisorSettings;
    use crate::system::{RecordingActions, SystemAction};
    use ihc_controller::mock::{MockCommandApi, MockEventStream};
    use ihc_core::{ConnectionState, TopicAddress};
    use ihc_controller::Snapshot;
    use ihc_mqtt::{BusClient, MemoryBus};
    use ihc_sync::SyncEngine;

    struct Fixture {
        actions: EscalationActions,
        system: Arc<RecordingActions>,
        bus: Arc<MemoryBus>,
        api: Arc<MockCommandApi>,
        supervisor: Arc<EventStreamSupervisor>,
        running: Arc<AtomicBool>,
    }

    fn fixture(stream: &MockEventStream) -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        let api = Arc::new(MockCommandApi::new());
        let system = Arc::new(RecordingActions::new());
        let relay = Arc::new(EventRelay::new(
            bus.clone(),
            Arc::new(SyncEngine::default()),
            Namespace::default(),
        ));
        let supervisor = Arc::new(EventStreamSupervisor::new(
            Arc::new(stream.clone()),
            relay.clone(),
            SupervisorSettings {
                reconnect_delay: Duration::from_millis(20),
                read_timeout: Duration::from_millis(10),
                join_timeout: Duration::from_secs(1),
            },
        ));
        let running = Arc::new(AtomicBool::new(true));
        let timing = ActionTiming {
            restart_settle: Duration::from_millis(1),
            probe_attempts: 3,
            probe_delay: Duration::from_millis(1),
            host_notice_delay: Duration::from_millis(1),
        };
        let actions = EscalationActions::new(
            system.clone(),
            supervisor.clone(),
            bus.clone(),
            api.clone(),
            relay,
            Namespace::default(),
            running.clone(),
            timing,
        );
        Fixture {
            actions,
            system,
            bus,
            api,
            supervisor,
            running,
        }
    }

    #[tokio::test]
    async fn test_service_restart_rebuilds_and_probes() {
        let stream = MockEventStream::new();
        let _peer = stream.script();
        let f = fixture(&stream);
        f.api.set_snapshot(Snapshot::new(vec![(TopicAddress::output(1, 1), true)]));
        f.api.fail_get_all(2);

        assert!(f.actions.restart_service(RestartReason::Manual).await);
        assert_eq!(f.system.calls(), vec![SystemAction::RestartService]);
        assert_eq!(f.api.get_all_calls(), 3);
        assert!(f.supervisor.is_running().await);
        assert_eq!(f.bus.retained("ihc/output/1/1/state").as_deref(), Some("ON"));

        f.supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_service_restart_gives_up_after_probes() {
        let stream = MockEventStream::new();
        let f = fixture(&stream);
        f.api.fail_get_all(10);

        assert!(!f.actions.restart_service(RestartReason::Escalation { failures: 3 }).await);
        assert_eq!(f.api.get_all_calls(), 3);

        f.supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_failed_service_restart_skips_reconnect() {
        let stream = MockEventStream::new();
        let f = fixture(&stream);
        f.system.fail_service_restart(true);

        assert!(!f.actions.restart_service(RestartReason::Manual).await);
        assert_eq!(f.api.get_all_calls(), 0);
        assert!(!f.supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_host_restart_tears_down() {
        let stream = MockEventStream::new();
        let f = fixture(&stream);
        f.bus.start().await.unwrap();
        f.supervisor.start().await;

        f.actions.restart_host().await;

        assert_eq!(f.system.calls(), vec![SystemAction::RestartHost]);
        assert_eq!(f.bus.published_to("ihc/system/status"), vec![HOST_RESTART_NOTICE]);
        assert!(!f.running.load(Ordering::SeqCst));
        assert_eq!(f.supervisor.state(), ConnectionState::ShuttingDown);
        assert_eq!(f.bus.connection().get(), ConnectionState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_failed_host_restart_resumes() {
        let stream = MockEventStream::new();
        let f = fixture(&stream);
        f.system.fail_host_restart(true);
        f.bus.start().await.unwrap();
        f.supervisor.start().await;

        f.actions.restart_host().await;

        assert!(f.running.load(Ordering::SeqCst));
        assert!(f.bus.connection().is_connected());
        assert_eq!(f.bus.starts(), 2);
        assert!(f.supervisor.is_running().await);

        f.supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_worker_runs_requests_in_order() {
        let stream = MockEventStream::new();
        let f = fixture(&stream);
        let actions = Arc::new(f.actions);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(actions.clone().run(rx, cancel.clone()));

        tx.send(EscalationRequest::ServiceRestart(RestartReason::Manual))
            .await
            .unwrap();
        tx.send(EscalationRequest::ServiceRestart(RestartReason::Manual))
            .await
            .unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(
            f.system.calls(),
            vec![SystemAction::RestartService, SystemAction::RestartService]
        );
        f.supervisor.shutdown(Duration::from_secs(1)).await;
    }
}
