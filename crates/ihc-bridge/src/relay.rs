//! Event relay: controller state reports onto the bus

use chrono::{DateTime, Utc};
use ihc_controller::{CommandApi, ControllerResult, Snapshot};
use ihc_core::{ControllerEvent, EventError, Namespace, OnOff, TopicAddress};
use ihc_mqtt::SharedBus;
use ihc_sync::SharedSyncEngine;
use tracing::{debug, error, info, warn};

/// What happened to one relayed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Published; `confirmed` is true when it cleared a pending write
    Published { address: TopicAddress, confirmed: bool },
    Discarded,
}

/// Republishes controller state reports retained on their state topics and
/// confirms pending writes
pub struct EventRelay {
    bus: SharedBus,
    engine: SharedSyncEngine,
    namespace: Namespace,
}

impl EventRelay {
    pub fn new(bus: SharedBus, engine: SharedSyncEngine, namespace: Namespace) -> Self {
        Self {
            bus,
            engine,
            namespace,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Relay one decoded event received at `now`
    pub async fn handle(&self, event: ControllerEvent, now: DateTime<Utc>) -> RelayOutcome {
        let io = match event.into_io_event() {
            Ok(io) => io,
            Err(EventError::Keepalive) => return RelayOutcome::Discarded,
            Err(e) => {
                warn!("Discarding controller event: {}", e);
                return RelayOutcome::Discarded;
            }
        };

        let address = io.address();
        self.publish_state(&address, io.state).await;

        let confirmed = io.confirms_output() && self.engine.try_confirm(io.key, io.state, now);
        if confirmed {
            debug!(device = %io.key, "Write confirmed by controller");
        }
        RelayOutcome::Published { address, confirmed }
    }

    /// Publish `state` retained on the address's state topic
    pub async fn publish_state(&self, address: &TopicAddress, state: bool) {
        let topic = self.namespace.state_topic(address);
        let payload = OnOff::from(state).as_str();
        match self.bus.publish(&topic, payload, true).await {
            Ok(()) => info!(topic = %topic, payload, "Published state"),
            Err(e) => error!(topic = %topic, "Failed to publish state: {}", e),
        }
    }

    /// Publish every entry of a controller snapshot
    pub async fn publish_snapshot(&self, snapshot: &Snapshot) {
        for (address, state) in snapshot.iter() {
            self.publish_state(address, *state).await;
        }
    }

    /// Fetch the controller's full state and publish it
    ///
    /// Doubles as the reachability check of the command API.
    pub async fn sync_snapshot(&self, api: &dyn CommandApi) -> ControllerResult<usize> {
        let snapshot = api.get_all().await?;
        self.publish_snapshot(&snapshot).await;
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ihc_controller::mock::MockCommandApi;
    use ihc_core::DeviceKey;
    use ihc_mqtt::MemoryBus;
    use ihc_sync::SyncEngine;
    use std::sync::Arc;

    fn relay() -> (EventRelay, Arc<MemoryBus>, SharedSyncEngine) {
        let bus = Arc::new(MemoryBus::new());
        let engine = Arc::new(SyncEngine::default());
        let relay = EventRelay::new(bus.clone(), engine.clone(), Namespace::default());
        (relay, bus, engine)
    }

    fn event(event_type: &str, module: u32, io: u32, state: bool) -> ControllerEvent {
        ControllerEvent {
            event_type: Some(event_type.to_string()),
            module_number: Some(module),
            io_number: Some(io),
            state: Some(state),
        }
    }

    #[tokio::test]
    async fn test_output_state_confirms_and_publishes() {
        let (relay, bus, engine) = relay();
        let now = Utc::now();
        engine.register(DeviceKey::new(4, 2), true, now);

        let outcome = relay.handle(event("outputState", 4, 2, true), now).await;
        assert_eq!(
            outcome,
            RelayOutcome::Published {
                address: TopicAddress::output(4, 2),
                confirmed: true
            }
        );
        assert_eq!(bus.retained("ihc/output/4/2/state").as_deref(), Some("ON"));
        assert!(!engine.is_pending(DeviceKey::new(4, 2)));
    }

    #[tokio::test]
    async fn test_mismatched_state_leaves_pending_entry() {
        let (relay, bus, engine) = relay();
        let now = Utc::now();
        engine.register(DeviceKey::new(4, 2), true, now);

        relay.handle(event("outputState", 4, 2, false), now).await;
        assert_eq!(bus.retained("ihc/output/4/2/state").as_deref(), Some("OFF"));
        assert!(engine.is_pending(DeviceKey::new(4, 2)));
    }

    #[tokio::test]
    async fn test_input_state_never_confirms() {
        let (relay, bus, engine) = relay();
        let now = Utc::now();
        engine.register(DeviceKey::new(1, 3), true, now);

        let outcome = relay.handle(event("inputState", 1, 3, true), now).await;
        assert!(matches!(
            outcome,
            RelayOutcome::Published {
                confirmed: false,
                ..
            }
        ));
        assert_eq!(bus.retained("ihc/input/1/3/state").as_deref(), Some("ON"));
        assert!(engine.is_pending(DeviceKey::new(1, 3)));
    }

    #[tokio::test]
    async fn test_incomplete_or_unknown_events_are_discarded() {
        let (relay, bus, _) = relay();
        let now = Utc::now();

        let mut missing_state = event("outputState", 4, 2, true);
        missing_state.state = None;
        assert_eq!(relay.handle(missing_state, now).await, RelayOutcome::Discarded);
        assert_eq!(
            relay.handle(event("dimmerLevel", 4, 2, true), now).await,
            RelayOutcome::Discarded
        );
        assert_eq!(
            relay.handle(event("ping", 0, 0, false), now).await,
            RelayOutcome::Discarded
        );
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_sync_snapshot_publishes_every_entry() {
        let (relay, bus, _) = relay();
        let api = MockCommandApi::new();
        api.set_snapshot(Snapshot::new(vec![
            (TopicAddress::output(1, 1), true),
            (TopicAddress::input(2, 5), false),
        ]));

        assert_eq!(relay.sync_snapshot(&api).await.unwrap(), 2);
        assert_eq!(bus.retained("ihc/output/1/1/state").as_deref(), Some("ON"));
        assert_eq!(bus.retained("ihc/input/2/5/state").as_deref(), Some("OFF"));

        api.fail_get_all(1);
        assert!(relay.sync_snapshot(&api).await.is_err());
    }
}
