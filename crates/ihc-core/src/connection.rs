//! Connection lifecycle states
//!
//! Enforces valid transitions for a supervised connection:
//!
//! ```text
//! Disconnected → Connecting → Connected
//!      ↑              ↓           ↓
//!      └──────────────┴───────────┘
//!
//! any state → ShuttingDown (terminal)
//! ```
//!
//! A [`ConnectionCell`] holds the live state of one connection and publishes
//! every change to its [`ConnectionWatch`] observers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle state of one supervised connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid connection transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Attempt a transition to a new state.
    pub fn try_transition(self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;

        let valid = match (self, to) {
            (ShuttingDown, _) => false,
            (_, ShuttingDown) => true,

            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting, Disconnected) => true,
            (Connected, Disconnected) => true,

            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        self.try_transition(to).is_ok()
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner side of a connection's state
///
/// Only the component supervising the connection holds the cell; everyone
/// else observes through a [`ConnectionWatch`].
#[derive(Debug)]
pub struct ConnectionCell {
    name: &'static str,
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionCell {
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `to` if the lifecycle allows it
    pub fn transition(&self, to: ConnectionState) -> Result<(), InvalidTransition> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| match state.try_transition(to) {
            Ok(next) => {
                debug!(connection = self.name, from = %state, to = %next, "Connection state change");
                *state = next;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        if let Err(ref e) = result {
            warn!(connection = self.name, "{}", e);
        }
        result
    }

    /// Settle in Disconnected unless already there or shutting down
    pub fn mark_disconnected(&self) {
        self.tx.send_if_modified(|state| match *state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(connection = self.name, from = %state, "Connection state change to disconnected");
                *state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        });
    }

    /// Start a fresh lifecycle after a shutdown that was called off
    pub fn reopen(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::ShuttingDown {
                debug!(connection = self.name, "Connection lifecycle reopened");
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    pub fn watch(&self) -> ConnectionWatch {
        ConnectionWatch {
            name: self.name,
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of a connection's state
#[derive(Debug, Clone)]
pub struct ConnectionWatch {
    name: &'static str,
    rx: watch::Receiver<ConnectionState>,
}

impl ConnectionWatch {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.get().is_connected()
    }

    /// Wait until the connection reaches `target`
    ///
    /// Returns false if the owning cell was dropped first.
    pub async fn wait_for(&mut self, target: ConnectionState) -> bool {
        self.rx.wait_for(|state| *state == target).await.is_ok()
    }
}
