//! Supervision of the controller event stream
//!
//! One read loop at a time connects, reads frames with a bounded wait,
//! answers keepalives and hands state reports to the [`EventRelay`]. On a
//! transport failure it waits and reconnects.
//!
//! ```text
//! start ──▶ [Connecting] ──ok──▶ [Connected] ──read error──┐
//!               │                                          │
//!               └──fail──▶ [Disconnected] ◀────────────────┘
//!                               │ wait reconnect_delay
//!                               └──▶ [Connecting] ...
//! ```

use chrono::Utc;
use ihc_controller::{ControllerError, EventConnection, EventStream};
use ihc_core::{ConnectionCell, ConnectionState, ConnectionWatch, Frame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::relay::EventRelay;

/// Timing of the read loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Wait between a lost connection and the next attempt
    pub reconnect_delay: Duration,
    /// Bound on a single read
    pub read_timeout: Duration,
    /// Bound on joining the read loop during a rebuild
    pub join_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(3),
        }
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the event stream read loop and its connection state
pub struct EventStreamSupervisor {
    stream: Arc<dyn EventStream>,
    relay: Arc<EventRelay>,
    settings: SupervisorSettings,
    cell: Arc<ConnectionCell>,
    current: Mutex<Option<LoopHandle>>,
}

impl EventStreamSupervisor {
    pub fn new(stream: Arc<dyn EventStream>, relay: Arc<EventRelay>, settings: SupervisorSettings) -> Self {
        Self {
            stream,
            relay,
            settings,
            cell: Arc::new(ConnectionCell::new("events")),
            current: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> ConnectionWatch {
        self.cell.watch()
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    /// Whether a read loop is currently owned
    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Start the read loop unless one is running or the supervisor is shut down
    pub async fn start(&self) {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = self.spawn_loop();
        }
    }

    /// Stop the current read loop and start a fresh one
    ///
    /// The old loop has terminated before the new one is spawned.
    pub async fn rebuild(&self) {
        let mut current = self.current.lock().await;
        info!("Rebuilding event stream connection");
        self.stop_locked(&mut current, self.settings.join_timeout).await;
        *current = self.spawn_loop();
    }

    /// Stop the read loop for good
    pub async fn shutdown(&self, join_timeout: Duration) {
        let mut current = self.current.lock().await;
        self.stop_locked(&mut current, join_timeout).await;
        if self.cell.get() != ConnectionState::ShuttingDown {
            let _ = self.cell.transition(ConnectionState::ShuttingDown);
        }
    }

    /// Allow [`start`](Self::start) and [`rebuild`](Self::rebuild) again after a shutdown
    pub fn reopen(&self) {
        self.cell.reopen();
    }

    fn spawn_loop(&self) -> Option<LoopHandle> {
        if self.cell.get() == ConnectionState::ShuttingDown {
            debug!("Supervisor shut down, not starting read loop");
            return None;
        }

        let cancel = CancellationToken::new();
        let read_loop = ReadLoop {
            stream: self.stream.clone(),
            relay: self.relay.clone(),
            settings: self.settings,
            cell: self.cell.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(read_loop.run());
        Some(LoopHandle { cancel, task })
    }

    async fn stop_locked(&self, current: &mut Option<LoopHandle>, join_timeout: Duration) {
        let Some(mut handle) = current.take() else {
            return;
        };

        handle.cancel.cancel();
        match tokio::time::timeout(join_timeout, &mut handle.task).await {
            Ok(Ok(())) => debug!("Read loop stopped"),
            Ok(Err(e)) => error!("Read loop failed: {}", e),
            Err(_) => {
                warn!(?join_timeout, "Read loop did not stop in time, aborting");
                handle.task.abort();
                let _ = handle.task.await;
            }
        }
        self.cell.mark_disconnected();
    }
}

enum ReadEnd {
    Cancelled,
    Lost(ControllerError),
}

struct ReadLoop {
    stream: Arc<dyn EventStream>,
    relay: Arc<EventRelay>,
    settings: SupervisorSettings,
    cell: Arc<ConnectionCell>,
    cancel: CancellationToken,
}

impl ReadLoop {
    async fn run(self) {
        loop {
            let _ = self.cell.transition(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                connected = self.stream.connect() => connected,
            };

            match connected {
                Ok(mut connection) => {
                    let _ = self.cell.transition(ConnectionState::Connected);
                    info!("Event stream connection established");
                    let end = self.read_frames(connection.as_mut()).await;
                    connection.close().await;
                    self.cell.mark_disconnected();
                    match end {
                        ReadEnd::Cancelled => break,
                        ReadEnd::Lost(e) => warn!("Event stream lost: {}", e),
                    }
                }
                Err(e) => {
                    error!("Event stream connection error: {}", e);
                    self.cell.mark_disconnected();
                }
            }

            info!(delay = ?self.settings.reconnect_delay, "Event stream disconnected, retrying");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
        self.cell.mark_disconnected();
        debug!("Read loop exiting");
    }

    async fn read_frames(&self, connection: &mut dyn EventConnection) -> ReadEnd {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return ReadEnd::Cancelled,
                frame = connection.next_frame(self.settings.read_timeout) => frame,
            };

            match frame {
                Ok(None) => {}
                Ok(Some(Frame::Ping)) => {
                    if let Err(e) = connection.send_pong().await {
                        return ReadEnd::Lost(e);
                    }
                    trace!("Answered keepalive");
                }
                Ok(Some(Frame::Event(event))) => {
                    self.relay.handle(event, Utc::now()).await;
                }
                Err(e) if e.is_protocol() => warn!("Discarding event frame: {}", e),
                Err(e) => return ReadEnd::Lost(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ihc_controller::mock::MockEventStream;
    use ihc_core::Namespace;
    use ihc_mqtt::MemoryBus;
    use ihc_sync::SyncEngine;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            reconnect_delay: Duration::from_millis(50),
            read_timeout: Duration::from_millis(20),
            join_timeout: Duration::from_secs(1),
        }
    }

    fn supervisor(stream: &MockEventStream) -> EventStreamSupervisor {
        let bus = Arc::new(MemoryBus::new());
        let relay = Arc::new(EventRelay::new(
            bus,
            Arc::new(SyncEngine::default()),
            Namespace::default(),
        ));
        EventStreamSupervisor::new(Arc::new(stream.clone()), relay, settings())
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let stream = MockEventStream::new();
        let peer = stream.script();
        let supervisor = supervisor(&stream);
        let mut watch = supervisor.connection();

        supervisor.start().await;
        assert!(watch.wait_for(ConnectionState::Connected).await);

        peer.send_ping();
        while peer.pongs() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(supervisor.state(), ConnectionState::ShuttingDown);
        assert_eq!(stream.active(), 0);
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let stream = MockEventStream::new();
        let first = stream.script();
        let _second = stream.script();
        let supervisor = supervisor(&stream);
        let mut watch = supervisor.connection();

        supervisor.start().await;
        assert!(watch.wait_for(ConnectionState::Connected).await);
        first.close();

        while stream.connects() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(watch.wait_for(ConnectionState::Connected).await);
        assert_eq!(stream.max_active(), 1);

        supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_prevents_restart() {
        let stream = MockEventStream::new();
        let supervisor = supervisor(&stream);

        supervisor.shutdown(Duration::from_secs(1)).await;
        supervisor.start().await;
        supervisor.rebuild().await;
        assert!(!supervisor.is_running().await);

        supervisor.reopen();
        supervisor.start().await;
        assert!(supervisor.is_running().await);
        supervisor.shutdown(Duration::from_secs(1)).await;
    }
}
