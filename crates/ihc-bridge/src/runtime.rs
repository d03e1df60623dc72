//! Bridge runtime: wiring and lifecycle of every worker
//!
//! ```text
//!              ┌──────────────┐   mpsc    ┌──────────────────┐
//!  bus ───────▶│   Ingress    │──────────▶│ Escalation worker│
//!              └──────┬───────┘           └────────▲─────────┘
//!                     │ register                   │ trigger
//!              ┌──────▼───────┐            ┌───────┴──────┐
//!              │  SyncEngine  │◀───────────│  Sweep tick  │
//!              └──────▲───────┘            └──────────────┘
//!                     │ try_confirm
//!              ┌──────┴───────┐
//!  events ────▶│ Relay (loop) │──────────▶ bus
//!              └──────────────┘
//! ```

use ihc_config::{BridgeConfig, BridgeSettings};
use ihc_controller::{CommandApi, EventStream};
use ihc_core::Namespace;
use ihc_mqtt::{BusMessage, SharedBus};
use ihc_sync::{EscalationPolicy, SharedSyncEngine, SyncConfig, SyncEngine};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actions::{ActionTiming, EscalationActions, EscalationRequest};
use crate::error::BridgeResult;
use crate::ingress::CommandIngress;
use crate::relay::EventRelay;
use crate::supervisor::{EventStreamSupervisor, SupervisorSettings};
use crate::sweep::SweepTask;
use crate::system::SystemActions;

/// Queued escalation requests beyond the one being executed
const ESCALATION_QUEUE: usize = 4;

/// External collaborators of the bridge
#[derive(Clone)]
pub struct BridgeServices {
    pub bus: SharedBus,
    pub api: Arc<dyn CommandApi>,
    pub events: Arc<dyn EventStream>,
    pub system: Arc<dyn SystemActions>,
}

/// Engine tuning from the bridge settings
pub fn sync_config(settings: &BridgeSettings) -> SyncConfig {
    SyncConfig {
        confirmation_timeout: settings.confirmation_timeout(),
        escalation: EscalationPolicy {
            threshold: settings.failure_threshold,
            window: settings.failure_window(),
        },
    }
}

impl From<&BridgeSettings> for SupervisorSettings {
    fn from(settings: &BridgeSettings) -> Self {
        SupervisorSettings {
            reconnect_delay: settings.event_reconnect_delay(),
            read_timeout: settings.event_read_timeout(),
            join_timeout: settings.loop_join_timeout(),
        }
    }
}

impl From<&BridgeSettings> for ActionTiming {
    fn from(settings: &BridgeSettings) -> Self {
        ActionTiming {
            restart_settle: settings.restart_settle(),
            probe_attempts: settings.reconnect_probe_attempts,
            probe_delay: settings.reconnect_probe_delay(),
            host_notice_delay: settings.host_restart_notice_delay(),
        }
    }
}

/// The assembled bridge
pub struct Bridge {
    services: BridgeServices,
    inbound: mpsc::Receiver<BusMessage>,
    engine: SharedSyncEngine,
    relay: Arc<EventRelay>,
    supervisor: Arc<EventStreamSupervisor>,
    actions: Arc<EscalationActions>,
    ingress: CommandIngress,
    sweep: SweepTask,
    escalation_rx: mpsc::Receiver<EscalationRequest>,
    shutdown_join_timeout: Duration,
}

impl Bridge {
    /// Wire the bridge; `inbound` receives the messages the bus delivers
    pub fn new(config: &BridgeConfig, services: BridgeServices, inbound: mpsc::Receiver<BusMessage>) -> Self {
        let settings = &config.bridge;
        let namespace = Namespace::new(config.mqtt.topic_prefix.as_str());
        let engine: SharedSyncEngine = Arc::new(SyncEngine::new(sync_config(settings)));
        let running = Arc::new(AtomicBool::new(true));
        let (escalation_tx, escalation_rx) = mpsc::channel(ESCALATION_QUEUE);

        let relay = Arc::new(EventRelay::new(
            services.bus.clone(),
            engine.clone(),
            namespace.clone(),
        ));
        let supervisor = Arc::new(EventStreamSupervisor::new(
            services.events.clone(),
            relay.clone(),
            SupervisorSettings::from(settings),
        ));
        let actions = Arc::new(EscalationActions::new(
            services.system.clone(),
            supervisor.clone(),
            services.bus.clone(),
            services.api.clone(),
            relay.clone(),
            namespace.clone(),
            running.clone(),
            ActionTiming::from(settings),
        ));
        let ingress = CommandIngress::new(
            services.bus.clone(),
            services.api.clone(),
            engine.clone(),
            namespace,
            supervisor.connection(),
            settings.trigger_word.as_str(),
            escalation_tx.clone(),
        );
        let sweep = SweepTask::new(engine.clone(), settings.sweep_interval(), running, escalation_tx);

        Self {
            services,
            inbound,
            engine,
            relay,
            supervisor,
            actions,
            ingress,
            sweep,
            escalation_rx,
            shutdown_join_timeout: settings.shutdown_join_timeout(),
        }
    }

    pub fn engine(&self) -> SharedSyncEngine {
        self.engine.clone()
    }

    pub fn supervisor(&self) -> Arc<EventStreamSupervisor> {
        self.supervisor.clone()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> BridgeResult<()> {
        let Bridge {
            services,
            inbound,
            relay,
            supervisor,
            actions,
            ingress,
            sweep,
            escalation_rx,
            shutdown_join_timeout,
            ..
        } = self;

        services.bus.start().await?;

        match relay.sync_snapshot(services.api.as_ref()).await {
            Ok(count) => info!(states = count, "Controller reachable, published initial states"),
            Err(e) => {
                error!("Initial connection to controller failed: {}", e);
                warn!("Starting anyway; commands fail until the controller is reachable");
            }
        }

        supervisor.start().await;

        let sweep_cancel = CancellationToken::new();
        let workers = CancellationToken::new();
        let sweep_task = tokio::spawn(sweep.run(sweep_cancel.clone()));
        let ingress_task = tokio::spawn(ingress.run(inbound, workers.clone()));
        let escalation_task = tokio::spawn(actions.run(escalation_rx, workers.clone()));

        info!("IHC bridge started");
        shutdown.cancelled().await;
        info!("Shutting down IHC bridge");

        sweep_cancel.cancel();
        join("sweep", sweep_task).await;

        // An in-flight escalation may reopen or rebuild the event stream,
        // so it must be gone before the read loop is stopped for good.
        workers.cancel();
        join("ingress", ingress_task).await;
        join("escalation", escalation_task).await;

        supervisor.shutdown(shutdown_join_timeout).await;

        services.bus.stop().await;
        info!("IHC bridge stopped");
        Ok(())
    }
}

async fn join(name: &str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        error!(worker = name, "Worker failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_conversion() {
        let settings = BridgeSettings::default();

        let sync = sync_config(&settings);
        assert_eq!(sync.confirmation_timeout, Duration::from_secs(10));
        assert_eq!(sync.escalation.threshold, 3);
        assert_eq!(sync.escalation.window, Duration::from_secs(300));

        let supervisor = SupervisorSettings::from(&settings);
        assert_eq!(supervisor, SupervisorSettings::default());

        let timing = ActionTiming::from(&settings);
        assert_eq!(timing, ActionTiming::default());
    }
}
