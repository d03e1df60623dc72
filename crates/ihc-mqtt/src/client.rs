//! Broker-backed bus client

use async_trait::async_trait;
use ihc_config::MqttConfig;
use ihc_core::{ConnectionCell, ConnectionState, ConnectionWatch, Namespace};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{BusClient, BusError, BusMessage, BusResult};

/// Requests buffered between the client handle and the I/O task
const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// `ihc_bridge_<unix seconds>`
fn default_client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("ihc_bridge_{}", secs)
}

struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`BusClient`] over an MQTT broker
///
/// The I/O task reconnects on its own with a fixed delay and re-subscribes
/// on every connect. Inbound publishes are forwarded to the channel given
/// at construction; the channel outlives stop/start cycles.
pub struct MqttBus {
    client_id: String,
    options: MqttOptions,
    subscriptions: Vec<String>,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<BusMessage>,
    cell: Arc<ConnectionCell>,
    session: Mutex<Option<Session>>,
}

impl MqttBus {
    pub fn new(config: &MqttConfig, namespace: &Namespace, inbound: mpsc::Sender<BusMessage>) -> Self {
        let client_id = config.client_id.clone().unwrap_or_else(default_client_id);
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        Self {
            client_id,
            options,
            subscriptions: namespace.subscriptions(),
            reconnect_delay: config.reconnect_delay(),
            inbound,
            cell: Arc::new(ConnectionCell::new("bus")),
            session: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl BusClient for MqttBus {
    async fn start(&self) -> BusResult<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        self.cell.reopen();
        let (client, eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let cancel = CancellationToken::new();
        let io = IoTask {
            client: client.clone(),
            eventloop,
            subscriptions: self.subscriptions.clone(),
            reconnect_delay: self.reconnect_delay,
            inbound: self.inbound.clone(),
            cell: self.cell.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(io.run());

        let (host, port) = self.options.broker_address();
        info!(host = %host, port, client_id = self.client_id(), "Bus client started");
        *session = Some(Session {
            client,
            cancel,
            task,
        });
        Ok(())
    }

    async fn stop(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };

        let graceful = self.cell.get().is_connected() && session.client.try_disconnect().is_ok();
        if !graceful || tokio::time::timeout(DISCONNECT_TIMEOUT, &mut session.task).await.is_err() {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                error!("Bus I/O task failed: {}", e);
            }
        }

        let _ = self.cell.transition(ConnectionState::ShuttingDown);
        info!("Bus client stopped");
    }

    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> BusResult<()> {
        let client = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(BusError::NotStarted)?;

        // try_publish: a disconnected broker must not stall the caller
        client.try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        trace!(topic, payload, retain, "Published");
        Ok(())
    }

    fn connection(&self) -> ConnectionWatch {
        self.cell.watch()
    }
}

struct IoTask {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Vec<String>,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<BusMessage>,
    cell: Arc<ConnectionCell>,
    cancel: CancellationToken,
}

impl IoTask {
    async fn run(mut self) {
        loop {
            if self.cell.get() == ConnectionState::Disconnected {
                let _ = self.cell.transition(ConnectionState::Connecting);
            }

            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        warn!(code = ?ack.code, "Broker refused connection");
                        continue;
                    }
                    let _ = self.cell.transition(ConnectionState::Connected);
                    info!("Connected to broker");
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = BusMessage {
                        topic: publish.topic,
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    };
                    debug!(topic = %message.topic, payload = %message.payload, "Received bus message");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.inbound.send(message) => {
                            if sent.is_err() {
                                debug!("Inbound channel closed, dropping message");
                            }
                        }
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("Disconnect sent to broker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Bus connection error: {}", e);
                    self.cell.mark_disconnected();
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
        self.cell.mark_disconnected();
    }

    fn subscribe_all(&self) {
        for filter in &self.subscriptions {
            match self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                Ok(()) => debug!(filter = %filter, "Subscribed"),
                Err(e) => error!(filter = %filter, "Failed to subscribe: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> MqttBus {
        let (tx, _rx) = mpsc::channel(8);
        MqttBus::new(&MqttConfig::default(), &Namespace::default(), tx)
    }

    #[test]
    fn test_default_client_id() {
        let bus = bus();
        assert!(bus.client_id().starts_with("ihc_bridge_"));
        assert_eq!(
            bus.subscriptions,
            vec!["ihc/output/+/+/set", "ihc/system/restart", "ihc/system/pi_restart"]
        );
    }

    #[test]
    fn test_configured_client_id() {
        let (tx, _rx) = mpsc::channel(8);
        let config = MqttConfig {
            client_id: Some("bridge-1".into()),
            ..Default::default()
        };
        let bus = MqttBus::new(&config, &Namespace::default(), tx);
        assert_eq!(bus.client_id(), "bridge-1");
    }

    #[tokio::test]
    async fn test_publish_before_start_fails() {
        let bus = bus();
        assert!(matches!(
            bus.publish("ihc/system/status", "x", false).await,
            Err(BusError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let bus = bus();
        bus.stop().await;
        assert_eq!(bus.connection().get(), ConnectionState::Disconnected);
    }
}
