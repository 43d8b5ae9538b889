//! Reconnecting stream client.
//!
//! A single supervisor task per run owns the connection: it connects, pumps
//! frames until the connection closes, then sleeps for the reconnect interval
//! and starts over. Because the loop is sequential there is never more than
//! one live connection. `stop()` clears the reconnect flag before waking the
//! supervisor, so a close observed during teardown never schedules another
//! attempt.

use crate::connector::{Connection, Connector, Frame};
use crate::error::LinkError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Between attempts
    Closed,
    /// Torn down by `stop()`
    Stopped,
}

/// Events delivered to the owner of a [`StreamClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    Open,
    Message(T),
    /// Emitted after every failed attempt or dropped connection
    Closed,
}

/// Stream client configuration
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    /// Fixed delay between a close and the next attempt
    pub reconnect_interval: Duration,
    /// Handshake timeout; `None` waits forever
    pub connect_timeout: Option<Duration>,
}

impl StreamClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

struct Run {
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Long-lived JSON subscription that reconnects after every close
pub struct StreamClient<T> {
    url: Url,
    config: StreamClientConfig,
    connector: Arc<dyn Connector>,
    should_reconnect: Arc<AtomicBool>,
    attempts: Arc<AtomicU64>,
    state: Arc<watch::Sender<ReadyState>>,
    events: mpsc::UnboundedSender<StreamEvent<T>>,
    run: Mutex<Option<Run>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StreamClient<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Create a client and the receiver its events are delivered on.
    /// Nothing is opened until [`StreamClient::connect`] is called.
    pub fn new(
        config: StreamClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamEvent<T>>), LinkError> {
        let url = parse_ws_url(&config.url)?;
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ReadyState::Idle);

        let client = Self {
            url,
            config,
            connector,
            should_reconnect: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
            events,
            run: Mutex::new(None),
            _marker: PhantomData,
        };
        Ok((client, rx))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }

    /// Total connection attempts made over the client's lifetime
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Start the supervisor. A no-op while a previous run is still alive
    /// (connecting, open or waiting to reconnect).
    pub fn connect(&self) {
        let mut run = self.run.lock();
        if let Some(existing) = run.as_ref() {
            if !existing.handle.is_finished() {
                debug!("connect() ignored, {} already has a live supervisor", self.url);
                return;
            }
        }

        self.should_reconnect.store(true, Ordering::SeqCst);
        let wake = Arc::new(Notify::new());
        let supervisor = Supervisor {
            url: self.url.clone(),
            reconnect_interval: self.config.reconnect_interval,
            connect_timeout: self.config.connect_timeout,
            connector: Arc::clone(&self.connector),
            should_reconnect: Arc::clone(&self.should_reconnect),
            attempts: Arc::clone(&self.attempts),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            wake: Arc::clone(&wake),
        };
        let handle = tokio::spawn(supervisor.run());
        *run = Some(Run { wake, handle });
    }

    /// Tear down the live connection and cancel any pending reconnect.
    /// Idempotent; returns once the supervisor has exited.
    pub async fn stop(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        let run = self.run.lock().take();
        if let Some(run) = run {
            run.wake.notify_one();
            if let Err(e) = run.handle.await {
                if e.is_panic() {
                    warn!("Stream supervisor for {} panicked", self.url);
                }
            }
        }
        self.state.send_replace(ReadyState::Stopped);
    }
}

impl<T> Drop for StreamClient<T> {
    fn drop(&mut self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        if let Some(run) = self.run.get_mut().take() {
            run.handle.abort();
        }
    }
}

fn parse_ws_url(raw: &str) -> Result<Url, LinkError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(LinkError::InvalidUrl(format!(
            "expected ws:// or wss://, got {}://",
            other
        ))),
    }
}

struct Supervisor<T> {
    url: Url,
    reconnect_interval: Duration,
    connect_timeout: Option<Duration>,
    connector: Arc<dyn Connector>,
    should_reconnect: Arc<AtomicBool>,
    attempts: Arc<AtomicU64>,
    state: Arc<watch::Sender<ReadyState>>,
    events: mpsc::UnboundedSender<StreamEvent<T>>,
    wake: Arc<Notify>,
}

impl<T> Supervisor<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn keep_going(&self) -> bool {
        self.should_reconnect.load(Ordering::SeqCst)
    }

    async fn run(self) {
        while self.keep_going() {
            self.state.send_replace(ReadyState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Connecting to {} (attempt {})", self.url, attempt);

            match self.open().await {
                Ok(mut conn) => {
                    if !self.keep_going() {
                        conn.close().await;
                        break;
                    }
                    info!("Connected to {}", self.url);
                    self.state.send_replace(ReadyState::Open);
                    let _ = self.events.send(StreamEvent::Open);
                    self.pump(conn.as_mut()).await;
                }
                Err(e) => warn!("Connection to {} failed: {}", self.url, e),
            }

            self.state.send_replace(ReadyState::Closed);
            let _ = self.events.send(StreamEvent::Closed);

            if !self.keep_going() {
                break;
            }

            info!(
                "Connection to {} closed, reconnecting in {:?}",
                self.url, self.reconnect_interval
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.state.send_replace(ReadyState::Stopped);
        debug!("Supervisor for {} exited", self.url);
    }

    async fn open(&self) -> Result<Box<dyn Connection>, LinkError> {
        let connect = self.connector.connect(&self.url);
        match self.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout(limit)),
            },
            None => connect.await,
        }
    }

    /// Forward frames until the connection closes or a stop is requested
    async fn pump(&self, conn: &mut dyn Connection) {
        loop {
            tokio::select! {
                frame = conn.next_frame() => match frame {
                    Ok(Some(frame)) => self.deliver(frame),
                    Ok(None) => {
                        debug!("{} closed by peer", self.url);
                        return;
                    }
                    Err(e) => {
                        warn!("Read error on {}: {}", self.url, e);
                        return;
                    }
                },
                _ = self.wake.notified() => {
                    debug!("Closing {} on request", self.url);
                    conn.close().await;
                    return;
                }
            }
        }
    }

    fn deliver(&self, frame: Frame) {
        let decoded = match &frame {
            Frame::Text(text) => serde_json::from_str::<T>(text),
            Frame::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => serde_json::from_str::<T>(text),
                Err(_) => {
                    warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len());
                    return;
                }
            },
        };

        match decoded {
            Ok(message) => {
                let _ = self.events.send(StreamEvent::Message(message));
            }
            Err(e) => warn!("Dropping undecodable message from {}: {}", self.url, e),
        }
    }
}
