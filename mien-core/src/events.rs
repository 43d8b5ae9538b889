//! Inputs consumed by the face driver: transport lifecycle, server messages
//! and presence signals

use crate::error::MienError;
use crate::expression::Expression;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Lifecycle of the external voice/video transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Initializing,
    Authenticating,
    Connecting,
    Connected,
    Ready,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
        }
    }

    /// Session is being set up
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Initializing
                | ConnectionState::Authenticating
                | ConnectionState::Connecting
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = MienError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(ConnectionState::Initializing),
            "authenticating" => Ok(ConnectionState::Authenticating),
            "connecting" => Ok(ConnectionState::Connecting),
            "connected" => Ok(ConnectionState::Connected),
            "ready" => Ok(ConnectionState::Ready),
            "disconnected" => Ok(ConnectionState::Disconnected),
            other => Err(MienError::InvalidValue(format!(
                "unknown connection state '{}'",
                other
            ))),
        }
    }
}

/// Application message from the remote bot
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    BotStartedSpeaking,
    BotStoppedSpeaking,
    ExpressionChange { expression: Expression },
    UserStartedSpeaking,
    UserStoppedSpeaking,
    /// `duration` is in seconds; absent or zero means no auto-hide
    ShowText { text: String, duration: Option<f64> },
    HideText,
}

#[derive(Deserialize)]
struct RawServerMessage {
    event: String,
    #[serde(default)]
    data: Option<RawPayload>,
}

#[derive(Deserialize, Default)]
struct RawPayload {
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl ServerMessage {
    /// Decode an `{event, data?}` object.
    ///
    /// Returns `None` for unknown events and for payloads missing what the
    /// event needs; such messages cause no transition at all.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let raw = match RawServerMessage::deserialize(value) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Dropping malformed server message: {}", e);
                return None;
            }
        };
        let data = raw.data.unwrap_or_default();

        let message = match raw.event.as_str() {
            "bot_started_speaking" => ServerMessage::BotStartedSpeaking,
            "bot_stopped_speaking" => ServerMessage::BotStoppedSpeaking,
            "user_started_speaking" => ServerMessage::UserStartedSpeaking,
            "user_stopped_speaking" => ServerMessage::UserStoppedSpeaking,
            "hide_text" => ServerMessage::HideText,
            "expression_change" => {
                let expression = data.expression.as_deref()?.parse().ok()?;
                ServerMessage::ExpressionChange { expression }
            }
            "show_text" => {
                let text = data.text.filter(|t| !t.is_empty())?;
                ServerMessage::ShowText {
                    text,
                    duration: data.duration,
                }
            }
            other => {
                debug!("Ignoring unrecognized server event: {}", other);
                return None;
            }
        };
        Some(message)
    }

    pub fn parse(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        Self::from_value(&value)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::BotStartedSpeaking => "bot_started_speaking",
            ServerMessage::BotStoppedSpeaking => "bot_stopped_speaking",
            ServerMessage::ExpressionChange { .. } => "expression_change",
            ServerMessage::UserStartedSpeaking => "user_started_speaking",
            ServerMessage::UserStoppedSpeaking => "user_stopped_speaking",
            ServerMessage::ShowText { .. } => "show_text",
            ServerMessage::HideText => "hide_text",
        }
    }
}

/// One update from the presence sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSignal {
    pub present: bool,
    #[serde(default)]
    pub face_count: u32,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub camera_index: Option<i64>,
}

impl PresenceSignal {
    pub fn new(present: bool, face_count: u32) -> Self {
        Self {
            present,
            face_count,
            last_update: None,
            error: None,
            camera_index: None,
        }
    }

    /// Sensor timestamp, accepting RFC 3339 or a naive ISO-8601 time (taken as UTC)
    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_update.as_deref()?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
