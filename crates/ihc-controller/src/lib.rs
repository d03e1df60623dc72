//! Clients for the IHC controller
//!
//! The controller exposes two surfaces:
//!
//! ```text
//! ┌──────────────┐  POST /ihcrequest      ┌──────────────┐
//! │  CommandApi  │ ─────────────────────▶ │              │
//! └──────────────┘  setOutput, getAll     │  Controller  │
//! ┌──────────────┐  ws /ihcevents-ws      │              │
//! │ EventStream  │ ◀───────────────────── │              │
//! └──────────────┘  outputState, ping     └──────────────┘
//! ```
//!
//! Both are traits. With the `test-util` feature, `mock` provides in-memory
//! doubles of both.

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod snapshot;
pub mod stream;

pub use client::{CommandApi, HttpCommandApi};
pub use error::{ControllerError, ControllerResult};
pub use snapshot::Snapshot;
pub use stream::{EventConnection, EventStream, WsEventStream};
