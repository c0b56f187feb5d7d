//! The per-session channel to the client device.

use crate::protocol::{CloseStatus, ServerMessage};
use async_trait::async_trait;

#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send(&self, message: ServerMessage) -> anyhow::Result<()>;

    /// Next text frame from the device.
    async fn receive(&self) -> anyhow::Result<String>;

    async fn close(&self, status: CloseStatus, reason: &str) -> anyhow::Result<()>;
}

#[cfg(feature = "server")]
pub use websocket::WebSocketTransport;

#[cfg(feature = "server")]
mod websocket {
    use super::DeviceTransport;
    use crate::protocol::{CloseStatus, ServerMessage};
    use async_trait::async_trait;
    use axum::extract::ws::{CloseFrame, Message, WebSocket};
    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use std::borrow::Cow;
    use tokio::sync::Mutex;
    use tracing::debug;

    pub struct WebSocketTransport {
        sink: Mutex<SplitSink<WebSocket, Message>>,
        stream: Mutex<SplitStream<WebSocket>>,
    }

    impl WebSocketTransport {
        pub fn new(socket: WebSocket) -> Self {
            let (sink, stream) = socket.split();
            Self {
                sink: Mutex::new(sink),
                stream: Mutex::new(stream),
            }
        }
    }

    #[async_trait]
    impl DeviceTransport for WebSocketTransport {
        async fn send(&self, message: ServerMessage) -> anyhow::Result<()> {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(message.encode()))
                .await
                .map_err(|e| anyhow::anyhow!("write to websocket failed: {}", e))
        }

        async fn receive(&self) -> anyhow::Result<String> {
            let mut stream = self.stream.lock().await;
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text),
                    Some(Ok(Message::Binary(_))) => {
                        return Err(anyhow::anyhow!("unexpected binary message"))
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        debug!("client closed connection: {:?}", frame);
                        return Err(anyhow::anyhow!("connection closed by client"));
                    }
                    Some(Err(e)) => return Err(anyhow::anyhow!("read from websocket failed: {}", e)),
                    None => return Err(anyhow::anyhow!("connection closed")),
                }
            }
        }

        async fn close(&self, status: CloseStatus, reason: &str) -> anyhow::Result<()> {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Close(Some(CloseFrame {
                code: status.code(),
                reason: Cow::Owned(reason.to_string()),
            })))
            .await
            .map_err(|e| anyhow::anyhow!("close websocket failed: {}", e))?;
            let _ = sink.close().await;
            Ok(())
        }
    }
}
