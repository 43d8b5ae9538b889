//! Presence feed: a [`StreamClient`] decoding [`PresenceSignal`]s, folded
//! into a last-value-wins snapshot

use crate::client::{StreamClient, StreamClientConfig, StreamEvent};
use crate::connector::{Connector, WsConnector};
use crate::error::LinkError;
use mien_core::{PresenceConfig, PresenceSignal};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Current view of the presence feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    /// Feed connection is open
    pub is_connected: bool,
    /// Most recent signal; kept across disconnects
    pub signal: Option<PresenceSignal>,
}

impl PresenceSnapshot {
    pub fn is_present(&self) -> bool {
        self.signal.as_ref().map(|s| s.present).unwrap_or(false)
    }

    pub fn face_count(&self) -> u32 {
        self.signal.as_ref().map(|s| s.face_count).unwrap_or(0)
    }

    pub fn last_signal(&self) -> Option<&PresenceSignal> {
        self.signal.as_ref()
    }
}

pub struct PresenceSource {
    client: Option<StreamClient<PresenceSignal>>,
    snapshot: Arc<watch::Sender<PresenceSnapshot>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceSource {
    /// Open the feed over a websocket (when `auto_connect` is set)
    pub fn spawn(config: &PresenceConfig) -> Result<Self, LinkError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: &PresenceConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, LinkError> {
        let (snapshot, _) = watch::channel(PresenceSnapshot::default());
        let snapshot = Arc::new(snapshot);

        if !config.auto_connect {
            info!("Presence feed disabled (auto_connect = false)");
            return Ok(Self {
                client: None,
                snapshot,
                pump: Mutex::new(None),
            });
        }

        let client_config = StreamClientConfig::new(config.url.clone())
            .with_reconnect_interval(config.reconnect_interval())
            .with_connect_timeout(config.connect_timeout());
        let (client, events) = StreamClient::new(client_config, connector)?;

        let pump = tokio::spawn(fold_events(events, Arc::clone(&snapshot)));
        client.connect();
        info!("Presence feed connecting to {}", client.url());

        Ok(Self {
            client: Some(client),
            snapshot,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected
    }

    pub fn is_present(&self) -> bool {
        self.snapshot.borrow().is_present()
    }

    pub fn face_count(&self) -> u32 {
        self.snapshot.borrow().face_count()
    }

    pub fn last_signal(&self) -> Option<PresenceSignal> {
        self.snapshot.borrow().signal.clone()
    }

    /// Whether this source ever opens a connection
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Close the feed and cancel any pending reconnect
    pub async fn stop(&self) {
        if let Some(client) = &self.client {
            client.stop().await;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.snapshot.send_if_modified(|snap| {
            let was_connected = snap.is_connected;
            snap.is_connected = false;
            was_connected
        });
        debug!("Presence feed stopped");
    }
}

impl Drop for PresenceSource {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn fold_events(
    mut events: mpsc::UnboundedReceiver<StreamEvent<PresenceSignal>>,
    snapshot: Arc<watch::Sender<PresenceSnapshot>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Open => {
                info!("Connected to presence service");
                snapshot.send_if_modified(|snap| !std::mem::replace(&mut snap.is_connected, true));
            }
            StreamEvent::Closed => {
                snapshot.send_if_modified(|snap| std::mem::replace(&mut snap.is_connected, false));
            }
            StreamEvent::Message(signal) => {
                debug!(
                    "Presence update: present={} faces={} at {:?}",
                    signal.present, signal.face_count, signal.last_update
                );
                snapshot.send_if_modified(|snap| {
                    if snap.signal.as_ref() == Some(&signal) {
                        false
                    } else {
                        snap.signal = Some(signal);
                        true
                    }
                });
            }
        }
    }
}
