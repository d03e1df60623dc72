//! In-memory controller doubles
//!
//! [`MockCommandApi`] records writes and can be told to reject them.
//! [`MockEventStream`] hands out scripted connections: every call to
//! [`MockEventStream::script`] queues one connection and returns the
//! [`MockPeer`] used to feed it frames.

use async_trait::async_trait;
use ihc_core::{DeviceKey, Frame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::CommandApi;
use crate::error::{ControllerError, ControllerResult};
use crate::snapshot::Snapshot;
use crate::stream::{EventConnection, EventStream};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted [`CommandApi`]
#[derive(Debug, Default)]
pub struct MockCommandApi {
    writes: Mutex<Vec<(DeviceKey, bool)>>,
    reject_writes: AtomicBool,
    snapshot: Mutex<Snapshot>,
    get_all_failures: AtomicU32,
    get_all_calls: AtomicUsize,
}

impl MockCommandApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `set_output` fail with status 500
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `get_all` fail
    pub fn fail_get_all(&self, count: u32) {
        self.get_all_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *lock(&self.snapshot) = snapshot;
    }

    /// Writes the controller accepted, in order
    pub fn writes(&self) -> Vec<(DeviceKey, bool)> {
        lock(&self.writes).clone()
    }

    pub fn get_all_calls(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandApi for MockCommandApi {
    async fn set_output(&self, key: DeviceKey, state: bool) -> ControllerResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(ControllerError::Status {
                status: 500,
                body: "rejected".to_string(),
            });
        }
        lock(&self.writes).push((key, state));
        Ok(())
    }

    async fn get_all(&self) -> ControllerResult<Snapshot> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .get_all_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ControllerError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(lock(&self.snapshot).clone())
    }
}

enum PeerMessage {
    Text(String),
    Close,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Scripted [`EventStream`]
///
/// `connect` fails while no scripted connection is queued.
#[derive(Clone, Default)]
pub struct MockEventStream {
    pending: Arc<Mutex<VecDeque<(mpsc::UnboundedReceiver<PeerMessage>, Arc<AtomicUsize>)>>>,
    counters: Arc<Counters>,
}

impl MockEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one connection and return its controller side
    pub fn script(&self) -> MockPeer {
        let (tx, rx) = mpsc::unbounded_channel();
        let pongs = Arc::new(AtomicUsize::new(0));
        lock(&self.pending).push_back((rx, pongs.clone()));
        MockPeer { tx, pongs }
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of connections ever open at once
    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStream for MockEventStream {
    async fn connect(&self) -> ControllerResult<Box<dyn EventConnection>> {
        let (rx, pongs) = lock(&self.pending)
            .pop_front()
            .ok_or(ControllerError::Closed)?;
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            rx,
            counters: self.counters.clone(),
            pongs,
        }))
    }
}

/// Controller side of one scripted connection
#[derive(Clone)]
pub struct MockPeer {
    tx: mpsc::UnboundedSender<PeerMessage>,
    pongs: Arc<AtomicUsize>,
}

impl MockPeer {
    /// Send a raw text frame
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(PeerMessage::Text(text.into()));
    }

    pub fn send_ping(&self) {
        self.send_text(r#"{"type":"ping"}"#);
    }

    pub fn send_output_state(&self, key: DeviceKey, state: bool) {
        self.send_state("outputState", key, state);
    }

    pub fn send_input_state(&self, key: DeviceKey, state: bool) {
        self.send_state("inputState", key, state);
    }

    fn send_state(&self, event_type: &str, key: DeviceKey, state: bool) {
        self.send_text(
            serde_json::json!({
                "type": event_type,
                "moduleNumber": key.module,
                "ioNumber": key.io,
                "state": state,
            })
            .to_string(),
        );
    }

    /// Close the connection from the controller side
    pub fn close(&self) {
        let _ = self.tx.send(PeerMessage::Close);
    }

    /// Pongs the bridge sent back on this connection
    pub fn pongs(&self) -> usize {
        self.pongs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct MockConnection {
    rx: mpsc::UnboundedReceiver<PeerMessage>,
    counters: Arc<Counters>,
    pongs: Arc<AtomicUsize>,
}

#[async_trait]
impl EventConnection for MockConnection {
    async fn next_frame(&mut self, wait: Duration) -> ControllerResult<Option<Frame>> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(PeerMessage::Text(text))) => Ok(Some(Frame::decode(&text)?)),
            Ok(Some(PeerMessage::Close)) | Ok(None) => Err(ControllerError::Closed),
        }
    }

    async fn send_pong(&mut self) -> ControllerResult<()> {
        self.pongs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_api_records_and_rejects() {
        let api = MockCommandApi::new();
        api.set_output(DeviceKey::new(1, 2), true).await.unwrap();
        api.reject_writes(true);
        assert!(api.set_output(DeviceKey::new(1, 3), true).await.is_err());
        assert_eq!(api.writes(), vec![(DeviceKey::new(1, 2), true)]);
    }

    #[tokio::test]
    async fn test_mock_api_get_all_failures_count_down() {
        let api = MockCommandApi::new();
        api.fail_get_all(2);
        assert!(api.get_all().await.is_err());
        assert!(api.get_all().await.is_err());
        assert!(api.get_all().await.is_ok());
        assert_eq!(api.get_all_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_stream_delivers_frames() {
        let stream = MockEventStream::new();
        assert!(stream.connect().await.is_err());

        let peer = stream.script();
        let mut conn = stream.connect().await.unwrap();
        assert_eq!(stream.active(), 1);

        peer.send_ping();
        peer.send_text("not json");
        peer.close();

        let wait = Duration::from_millis(100);
        assert_eq!(conn.next_frame(wait).await.unwrap(), Some(Frame::Ping));
        conn.send_pong().await.unwrap();
        assert_eq!(peer.pongs(), 1);
        assert!(conn.next_frame(wait).await.unwrap_err().is_protocol());
        assert!(matches!(
            conn.next_frame(wait).await,
            Err(ControllerError::Closed)
        ));

        drop(conn);
        assert_eq!(stream.active(), 0);
        assert_eq!(stream.max_active(), 1);
    }
}
