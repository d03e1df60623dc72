//! Publish/subscribe bus for the IHC bridge
//!
//! The bridge talks to the broker through the [`BusClient`] trait:
//! - [`MqttBus`] is the broker-backed client; inbound messages on the
//!   namespace's subscriptions are forwarded into an `mpsc` channel
//! - [`MemoryBus`] records publishes in memory for tests

mod client;
mod memory;

pub use client::MqttBus;
pub use memory::{MemoryBus, Published};

use async_trait::async_trait;
use ihc_core::ConnectionWatch;
use std::sync::Arc;
use thiserror::Error;

/// Capacity of the inbound message channel
pub const INBOUND_CAPACITY: usize = 256;

/// A message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Error type for bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus client is not started")]
    NotStarted,

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Connection to the publish/subscribe broker
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Start the client's I/O task; a no-op while already started
    async fn start(&self) -> BusResult<()>;

    /// Disconnect and join the I/O task; a no-op while stopped
    async fn stop(&self);

    /// Publish a UTF-8 payload
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> BusResult<()>;

    /// Observe the broker connection
    fn connection(&self) -> ConnectionWatch;
}

/// Thread-safe handle to the bus
pub type SharedBus = Arc<dyn BusClient>;
