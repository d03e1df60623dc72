//! Command ingress: bus messages into controller writes and system requests

use chrono::Utc;
use ihc_controller::CommandApi;
use ihc_core::{BusTopic, ConnectionWatch, DeviceKey, Namespace, OnOff, SystemTopic, TopicAddress, TopicError};
use ihc_mqtt::{BusMessage, SharedBus};
use ihc_sync::SharedSyncEngine;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::{EscalationRequest, RestartReason};

/// Status notice acknowledging a manual service restart
pub const MANUAL_RESTART_ACK: &str = "Restarting IHC server";

/// What the ingress did with one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// The controller accepted the write and a confirmation is pending
    Submitted { key: DeviceKey, state: bool },
    /// The controller rejected the write or was unreachable
    SubmitFailed { key: DeviceKey, state: bool },
    /// A system action was requested
    Escalated(EscalationRequest),
    /// A system topic without the trigger word, or a topic we never act on
    Ignored,
    /// The topic could not be classified
    Discarded(TopicError),
}

/// Classifies inbound bus messages and acts on them
pub struct CommandIngress {
    bus: SharedBus,
    api: Arc<dyn CommandApi>,
    engine: SharedSyncEngine,
    namespace: Namespace,
    events: ConnectionWatch,
    trigger_word: String,
    escalation: mpsc::Sender<EscalationRequest>,
}

impl CommandIngress {
    pub fn new(
        bus: SharedBus,
        api: Arc<dyn CommandApi>,
        engine: SharedSyncEngine,
        namespace: Namespace,
        events: ConnectionWatch,
        trigger_word: impl Into<String>,
        escalation: mpsc::Sender<EscalationRequest>,
    ) -> Self {
        Self {
            bus,
            api,
            engine,
            namespace,
            events,
            trigger_word: trigger_word.into(),
            escalation,
        }
    }

    /// Consume inbound messages until cancelled or the channel closes
    pub async fn run(self, mut inbound: mpsc::Receiver<BusMessage>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle(&message).await;
        }
        debug!("Command ingress stopped");
    }

    pub async fn handle(&self, message: &BusMessage) -> IngressOutcome {
        match self.namespace.parse(&message.topic) {
            Ok(BusTopic::System(topic)) => self.handle_system(topic, &message.payload).await,
            Ok(BusTopic::Set(key)) => {
                let state = OnOff::from_payload(&message.payload).is_on();
                info!(module = key.module, output = key.io, state = OnOff::from(state).as_str(), "Received command");
                self.submit(key, state).await
            }
            Ok(BusTopic::State(_)) => IngressOutcome::Ignored,
            Err(e) => {
                warn!(topic = %message.topic, "Invalid topic format: {}", e);
                IngressOutcome::Discarded(e)
            }
        }
    }

    async fn handle_system(&self, topic: SystemTopic, payload: &str) -> IngressOutcome {
        if !payload.eq_ignore_ascii_case(&self.trigger_word) {
            debug!(topic = topic.as_str(), payload, "Ignoring system message without trigger word");
            return IngressOutcome::Ignored;
        }

        let request = match topic {
            SystemTopic::Restart => {
                info!("Received manual restart command");
                let status = self.namespace.system_topic(SystemTopic::Status);
                if let Err(e) = self.bus.publish(&status, MANUAL_RESTART_ACK, false).await {
                    warn!("Failed to publish restart acknowledgement: {}", e);
                }
                EscalationRequest::ServiceRestart(RestartReason::Manual)
            }
            SystemTopic::HostRestart => {
                info!("Received host restart command");
                EscalationRequest::HostRestart
            }
            SystemTopic::Status => return IngressOutcome::Ignored,
        };

        if let Err(e) = self.escalation.try_send(request) {
            warn!("Escalation request dropped: {}", e);
        }
        IngressOutcome::Escalated(request)
    }

    #[instrument(skip(self))]
    async fn submit(&self, key: DeviceKey, state: bool) -> IngressOutcome {
        if !self.events.is_connected() {
            warn!(
                device = %key,
                events = %self.events.get(),
                "Event stream not connected, submitting without live confirmation"
            );
        }

        match self.api.set_output(key, state).await {
            Ok(()) => {
                self.engine.register(key, state, Utc::now());
                let topic = self.namespace.state_topic(&TopicAddress::output(key.module, key.io));
                let payload = OnOff::from(state).as_str();
                if let Err(e) = self.bus.publish(&topic, payload, true).await {
                    error!(topic = %topic, "Failed to publish state: {}", e);
                }
                info!(device = %key, state = payload, "Successfully set output");
                IngressOutcome::Submitted { key, state }
            }
            Err(e) => {
                error!(device = %key, "Error communicating with controller: {}", e);
                IngressOutcome::SubmitFailed { key, state }
            }
        }
    }
}
