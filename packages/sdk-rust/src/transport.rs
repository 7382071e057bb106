//! Text transport underneath the STOMP session
//!
//! The signaling runtime only needs "send text, receive text, close", so the
//! WebSocket sits behind [`Transport`] and is opened through a [`Connector`].
//! Tests substitute scripted implementations.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use crate::error::{SdkError, SdkResult};

/// An open, message-oriented text connection
///
/// `recv` must be cancel-safe: the runtime polls it inside `tokio::select!`.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, text: String) -> SdkResult<()>;

    /// Next text message; `None` once the peer closed the connection
    ///
    /// `Err(SdkError::InvalidResponse)` rejects a single unreadable message and
    /// leaves the connection open. Any other error means it is gone.
    async fn recv(&mut self) -> Option<SdkResult<String>>;

    async fn close(&mut self) -> SdkResult<()>;
}

/// Opens transports to a messaging endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, url: &str) -> SdkResult<Self::Transport>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> SdkResult<WsTransport> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| SdkError::WebSocketError(e.to_string()))?;
        Ok(WsTransport { stream })
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> SdkResult<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SdkError::WebSocketError(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SdkResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|e| {
                        SdkError::InvalidResponse(format!("non-UTF-8 binary frame: {}", e))
                    }))
                }
                Ok(Message::Close(_)) => return None,
                // tungstenite answers pings itself
                Ok(_) => continue,
                Err(e) => return Some(Err(SdkError::WebSocketError(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> SdkResult<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| SdkError::WebSocketError(e.to_string()))
    }
}
