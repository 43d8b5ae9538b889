//! mien-link: resilient streaming subscriptions for mien
//!
//! - [`StreamClient`]: JSON-over-websocket subscription with fixed-delay
//!   reconnect, at most one live connection and race-free teardown
//! - [`Connector`]/[`Connection`]: transport seam, with [`WsConnector`]
//!   backed by tokio-tungstenite
//! - [`PresenceSource`]: presence sensor feed as a watchable snapshot

pub mod error;
pub mod connector;
pub mod client;
pub mod presence;

pub use error::LinkError;
pub use connector::{Connection, Connector, Frame, WsConnector};
pub use client::{ReadyState, StreamClient, StreamClientConfig, StreamEvent};
pub use presence::{PresenceSnapshot, PresenceSource};
