//! Error types for the bridge runtime

use ihc_mqtt::BusError;
use thiserror::Error;

/// Errors that stop the bridge from starting
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bus client failed to start: {0}")]
    Bus(#[from] BusError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A privileged action that did not complete
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no command configured for {0}")]
    EmptyCommand(&'static str),

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code:?}")]
    Failed { command: String, code: Option<i32> },
}

/// Result type for privileged actions
pub type ActionResult<T> = Result<T, ActionError>;
