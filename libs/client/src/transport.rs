//! Transport session over WebSocket.
//!
//! A [`Connector`] opens one fresh session per (re)connect attempt; the
//! returned [`Transport`] owns that single logical connection. Sessions are
//! never reused across reconnects — the controller drops the old one and asks
//! the connector for a new one.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// One logical connection to the collector.
///
/// `send` and `receive` fail with a transport error once the connection is no
/// longer open; `close` terminates the connection immediately regardless of
/// in-flight operations and is safe to call more than once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit one text frame.
    async fn send(&self, frame: String) -> Result<()>;

    /// Yield the next inbound text frame, or fail when the connection drops.
    async fn receive(&self) -> Result<String>;

    /// Terminate the connection. Idempotent.
    async fn close(&self);
}

/// Factory for transport sessions. A successful `connect` is the session's
/// open event.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>>;
}

/// WebSocket session backed by tokio-tungstenite.
///
/// The sink and stream halves are guarded separately so a send never waits on
/// an in-flight receive. Only the controller's receive loop touches the
/// stream half.
pub struct WsSession {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<SplitStream<WsStream>>,
}

#[async_trait]
impl Transport for WsSession {
    async fn send(&self, frame: String) -> Result<()> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(Message::Text(frame))
                .await
                .map_err(ClientError::from),
            None => Err(ClientError::Closed),
        }
    }

    async fn receive(&self) -> Result<String> {
        let mut guard = self.stream.lock().await;
        loop {
            match guard.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(_))) => return Err(ClientError::Closed),
                // Ping/pong are handled by tungstenite; binary frames are not
                // part of the protocol.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Closed),
            }
        }
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            sink.close().await.ok();
        }
    }
}

/// Production connector using `tokio_tungstenite::connect_async`.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>> {
        let (ws, response) = connect_async(url).await?;
        debug!(status = ?response.status(), "collector handshake complete");

        let (sink, stream) = ws.split();
        Ok(Arc::new(WsSession {
            sink: Mutex::new(Some(sink)),
            stream: Mutex::new(stream),
        }))
    }
}
