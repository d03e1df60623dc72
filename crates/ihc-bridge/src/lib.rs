//! IHC controller to MQTT bridge
//!
//! Mirrors controller state onto the bus and turns bus commands into
//! controller writes:
//! - [`EventRelay`] republishes state reports and confirms pending writes
//! - [`CommandIngress`] classifies inbound messages, submits writes and
//!   requests restarts
//! - [`EventStreamSupervisor`] keeps exactly one event stream read loop alive
//! - [`EscalationActions`] restarts the controller service or the host
//! - [`Bridge`] wires everything together and owns the shutdown order

pub mod actions;
pub mod error;
pub mod ingress;
pub mod relay;
pub mod runtime;
pub mod supervisor;
pub mod sweep;
pub mod system;

pub use actions::{ActionTiming, EscalationActions, EscalationRequest, RestartReason, HOST_RESTART_NOTICE};
pub use error::{ActionError, ActionResult, BridgeError, BridgeResult};
pub use ingress::{CommandIngress, IngressOutcome, MANUAL_RESTART_ACK};
pub use relay::{EventRelay, RelayOutcome};
pub use runtime::{sync_config, Bridge, BridgeServices};
pub use supervisor::{EventStreamSupervisor, SupervisorSettings};
pub use sweep::SweepTask;
pub use system::{CommandSystemActions, RecordingActions, SystemAction, SystemActions};
