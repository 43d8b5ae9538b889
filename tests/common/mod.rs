// Shared helpers: a throwaway presence sensor served over a real websocket

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use mien_core::PresenceConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct SensorServer {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<SensorPeer>,
    acceptor: JoinHandle<()>,
}

impl SensorServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, accepted) = mpsc::unbounded_channel();

        let acceptor = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(SensorPeer { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            accepted,
            acceptor,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Presence config pointing at this server with a short reconnect delay
    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            url: self.url(),
            reconnect_interval_ms: 100,
            connect_timeout_ms: 2000,
            ..Default::default()
        }
    }

    pub async fn next_peer(&mut self) -> SensorPeer {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a client")
            .expect("acceptor stopped")
    }

    /// Whether a client connects within `window`
    pub async fn connects_within(&mut self, window: Duration) -> bool {
        matches!(timeout(window, self.accepted.recv()).await, Ok(Some(_)))
    }
}

impl Drop for SensorServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

pub struct SensorPeer {
    ws: WebSocketStream<TcpStream>,
}

impl SensorPeer {
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send to client");
    }

    pub async fn send_presence(&mut self, present: bool, faces: u32) {
        let body = serde_json::json!({
            "present": present,
            "face_count": faces,
            "last_update": "2024-05-01T12:00:00.250",
        });
        self.send_text(&body.to_string()).await;
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws.send(Message::Binary(data)).await.expect("send to client");
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Wait until the client hangs up
    pub async fn closed_by_client(&mut self) -> bool {
        let hung_up = async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        };
        timeout(WAIT, hung_up).await.is_ok()
    }
}

/// Wait until the watched value satisfies `pred` and return a copy of it
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, what: &str, pred: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    let waited = timeout(WAIT, async {
        loop {
            {
                let value = rx.borrow_and_update();
                if pred(&*value) {
                    return (*value).clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("sender dropped while waiting for {}", what);
            }
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}
