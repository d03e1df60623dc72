//! Core types for the IHC bridge
//!
//! This crate provides the fundamental types shared by every other crate in
//! the workspace: topic addresses and device keys, the ON/OFF payload
//! encoding, decoded controller events, and the connection lifecycle states.

mod connection;
mod event;
mod payload;
mod topic;

pub use connection::{ConnectionCell, ConnectionState, ConnectionWatch, InvalidTransition};
pub use event::{ControllerEvent, EventError, EventKind, Frame, IoEvent};
pub use payload::OnOff;
pub use topic::{BusTopic, DeviceKey, Direction, Namespace, SystemTopic, TopicAddress, TopicError};

/// Default namespace prefix for every bus topic
pub const DEFAULT_TOPIC_PREFIX: &str = "ihc";

/// Default payload that triggers a system action on the control topics
pub const DEFAULT_TRIGGER_WORD: &str = "RESTART";

/// Well-known controller frame types
pub mod frames {
    /// Keepalive sent by the controller
    pub const PING: &str = "ping";

    /// Keepalive reply sent back to the controller
    pub const PONG: &str = "pong";

    /// Output state report
    pub const OUTPUT_STATE: &str = "outputState";

    /// Input state report
    pub const INPUT_STATE: &str = "inputState";

    /// Command API request that writes an output
    pub const SET_OUTPUT: &str = "setOutput";

    /// Command API request that returns every module state
    pub const GET_ALL: &str = "getAll";
}
