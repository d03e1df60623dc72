//! Controller event stream
//!
//! [`EventStream`] opens connections; each [`EventConnection`] yields decoded
//! [`Frame`]s until the peer goes away. Reads are bounded by a wait so the
//! caller can check for cancellation between frames.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use ihc_core::Frame;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::{ControllerError, ControllerResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Factory for event stream connections
#[async_trait]
pub trait EventStream: Send + Sync {
    async fn connect(&self) -> ControllerResult<Box<dyn EventConnection>>;
}

/// One open event stream
#[async_trait]
pub trait EventConnection: Send {
    /// Read the next frame, or `Ok(None)` if nothing arrived within `wait`
    ///
    /// A [`ControllerError::Protocol`] error leaves the connection usable.
    async fn next_frame(&mut self, wait: Duration) -> ControllerResult<Option<Frame>>;

    /// Answer a keepalive
    async fn send_pong(&mut self) -> ControllerResult<()>;

    /// Close the connection, ignoring errors
    async fn close(&mut self);
}

/// [`EventStream`] over the controller's WebSocket endpoint
#[derive(Debug, Clone)]
pub struct WsEventStream {
    url: String,
    connect_timeout: Duration,
}

impl WsEventStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventStream for WsEventStream {
    async fn connect(&self) -> ControllerResult<Box<dyn EventConnection>> {
        let (ws, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ControllerError::ConnectTimeout(self.connect_timeout))??;
        debug!(url = %self.url, "Event stream connected");
        Ok(Box::new(WsConnection { ws }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EventConnection for WsConnection {
    async fn next_frame(&mut self, wait: Duration) -> ControllerResult<Option<Frame>> {
        let message = match timeout(wait, self.ws.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(ControllerError::Closed),
            Ok(Some(message)) => message?,
        };

        match message {
            Message::Text(text) => Ok(Some(Frame::decode(&text)?)),
            Message::Binary(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Ok(Some(Frame::decode(&text)?))
            }
            Message::Close(frame) => {
                debug!(?frame, "Event stream closed by controller");
                Err(ControllerError::Closed)
            }
            other => {
                trace!(?other, "Ignoring control frame");
                Ok(None)
            }
        }
    }

    async fn send_pong(&mut self) -> ControllerResult<()> {
        self.ws.send(Message::Text(Frame::pong())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            trace!("Error closing event stream: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ihc_config::ControllerConfig;

    #[test]
    fn test_stream_url_from_config() {
        let stream = WsEventStream::new(ControllerConfig::default().events_url());
        assert_eq!(stream.url(), "ws://127.0.0.1:8081/ihcevents-ws");
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        // nothing listens on port 1
        let stream = WsEventStream::new("ws://127.0.0.1:1/ihcevents-ws")
            .with_connect_timeout(Duration::from_secs(2));
        assert!(stream.connect().await.is_err());
    }
}
