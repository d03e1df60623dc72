//! In-memory bus recording every publish

use async_trait::async_trait;
use dashmap::DashMap;
use ihc_core::{ConnectionCell, ConnectionState, ConnectionWatch};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{BusClient, BusError, BusResult};

/// One recorded publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// [`BusClient`] that keeps publishes in memory
///
/// Retained payloads are tracked per topic the way a broker would replay
/// them. Publishing works whether or not the bus is started.
#[derive(Debug)]
pub struct MemoryBus {
    published: Mutex<Vec<Published>>,
    retained: DashMap<String, String>,
    failing: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    cell: ConnectionCell,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            retained: DashMap::new(),
            failing: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            cell: ConnectionCell::new("bus"),
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<Published>> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following publish fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every publish, in order
    pub fn published(&self) -> Vec<Published> {
        self.log().clone()
    }

    /// Payloads published on `topic`, in order
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.log()
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    /// Last retained payload on `topic`
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained.get(topic).map(|v| v.value().clone())
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn start(&self) -> BusResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.cell.reopen();
        if self.cell.get() == ConnectionState::Disconnected {
            let _ = self.cell.transition(ConnectionState::Connecting);
            let _ = self.cell.transition(ConnectionState::Connected);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.cell.get() != ConnectionState::ShuttingDown {
            let _ = self.cell.transition(ConnectionState::ShuttingDown);
        }
    }

    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> BusResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Rejected(topic.to_string()));
        }
        if retain {
            self.retained.insert(topic.to_string(), payload.to_string());
        }
        self.log().push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        Ok(())
    }

    fn connection(&self) -> ConnectionWatch {
        self.cell.watch()
    }
}
