//! Transport seam between the stream client and the socket implementation

use crate::error::LinkError;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

/// Application data received on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// One live connection
#[async_trait]
pub trait Connection: Send {
    /// Next data frame, or `Ok(None)` once the peer has closed
    async fn next_frame(&mut self) -> Result<Option<Frame>, LinkError>;

    /// Close the connection. Errors are swallowed; the connection is gone either way.
    async fn close(&mut self);
}

/// Opens connections for a [`crate::StreamClient`]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, LinkError>;
}

/// Websocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, LinkError> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| LinkError::Connect(format!("Failed to connect WebSocket: {}", e)))?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn next_frame(&mut self) -> Result<Option<Frame>, LinkError> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(Frame::Text(text))),
                Ok(Message::Binary(data)) => return Ok(Some(Frame::Binary(data))),
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket close frame received: {:?}", frame);
                    return Ok(None);
                }
                Ok(other) => trace!("Ignoring control frame: {:?}", other),
                Err(e) => return Err(LinkError::Transport(e.to_string())),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("WebSocket close error: {}", e);
        }
    }
}
