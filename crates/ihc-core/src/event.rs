//! Frames received on the controller event stream
//!
//! The controller pushes JSON text frames. A frame is either a keepalive
//! (`{"type": "ping"}`) or a state report such as
//! `{"type": "outputState", "moduleNumber": 4, "ioNumber": 2, "state": true}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames;
use crate::topic::{DeviceKey, Direction, TopicAddress};

/// Error type for frames that cannot be turned into a state report
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("keepalive frames are not state reports")]
    Keepalive,

    #[error("unknown event type '{0}'")]
    UnknownType(String),
}

/// A decoded frame whose fields have not been validated yet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub module_number: Option<u32>,
    pub io_number: Option<u32>,
    pub state: Option<bool>,
}

impl ControllerEvent {
    /// Whether this frame is a keepalive from the controller
    pub fn is_ping(&self) -> bool {
        self.event_type.as_deref() == Some(frames::PING)
    }

    /// Validate the frame into a state report
    pub fn into_io_event(self) -> Result<IoEvent, EventError> {
        let event_type = self.event_type.ok_or(EventError::MissingField("type"))?;
        let module = self
            .module_number
            .ok_or(EventError::MissingField("moduleNumber"))?;
        let io = self.io_number.ok_or(EventError::MissingField("ioNumber"))?;
        let state = self.state.ok_or(EventError::MissingField("state"))?;

        if event_type == frames::PING {
            return Err(EventError::Keepalive);
        }

        let kind = EventKind::from_type(&event_type)?;
        Ok(IoEvent {
            kind,
            key: DeviceKey::new(module, io),
            state,
        })
    }
}

/// Kind of state report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OutputState,
    InputState,
}

impl EventKind {
    fn from_type(event_type: &str) -> Result<Self, EventError> {
        match event_type {
            frames::OUTPUT_STATE => Ok(EventKind::OutputState),
            frames::INPUT_STATE => Ok(EventKind::InputState),
            other => Err(EventError::UnknownType(other.to_string())),
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            EventKind::OutputState => Direction::Output,
            EventKind::InputState => Direction::Input,
        }
    }
}

/// A validated state report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoEvent {
    pub kind: EventKind,
    pub key: DeviceKey,
    pub state: bool,
}

impl IoEvent {
    pub fn address(&self) -> TopicAddress {
        TopicAddress {
            direction: self.kind.direction(),
            key: self.key,
        }
    }

    /// Whether this report can confirm a pending output write
    pub fn confirms_output(&self) -> bool {
        self.kind == EventKind::OutputState
    }
}

/// One frame read from the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping,
    Event(ControllerEvent),
}

impl Frame {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, EventError> {
        let event: ControllerEvent = serde_json::from_str(text)?;
        if event.is_ping() {
            Ok(Frame::Ping)
        } else {
            Ok(Frame::Event(event))
        }
    }

    /// The keepalive reply sent back on the same stream
    pub fn pong() -> String {
        serde_json::json!({ "type": frames::PONG }).to_string()
    }
}
