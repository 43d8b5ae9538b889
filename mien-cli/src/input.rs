// Line protocol read from stdin by `mien run`

use anyhow::{anyhow, bail, Context, Result};
use mien_core::{ConnectionState, Expression, ServerMessage};
use serde::Deserialize;
use serde_json::Value;

/// Manual controls, the same ones a debug panel would offer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DebugCommand {
    ShowText {
        text: String,
        #[serde(default)]
        duration: Option<f64>,
    },
    HideText,
    SetExpression {
        expression: Expression,
    },
    SetTalking {
        talking: bool,
    },
    SetPresenceDetection {
        enabled: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputLine {
    /// `{"event": "...", "data": {...}}`
    Server(ServerMessage),
    /// `{"transport": "connecting"}`
    Transport(ConnectionState),
    /// `{"presence": true}`, used when no presence feed is running
    Presence(bool),
    /// `{"samples": [0.1, -0.2, ...]}` appended to the bot audio track
    Samples(Vec<f32>),
    /// `{"command": "...", ...}`
    Command(DebugCommand),
}

/// Parse one line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<InputLine>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line).context("input is not JSON")?;
    let Some(object) = value.as_object() else {
        bail!("input must be a JSON object");
    };

    if object.contains_key("event") {
        let message = ServerMessage::from_value(&value)
            .ok_or_else(|| anyhow!("unrecognised server message: {}", line))?;
        return Ok(Some(InputLine::Server(message)));
    }

    if let Some(transport) = object.get("transport") {
        let name = transport
            .as_str()
            .ok_or_else(|| anyhow!("transport must be a string"))?;
        let state: ConnectionState = name.parse()?;
        return Ok(Some(InputLine::Transport(state)));
    }

    if let Some(presence) = object.get("presence") {
        let present = presence
            .as_bool()
            .ok_or_else(|| anyhow!("presence must be a boolean"))?;
        return Ok(Some(InputLine::Presence(present)));
    }

    if let Some(samples) = object.get("samples") {
        let samples: Vec<f32> =
            serde_json::from_value(samples.clone()).context("samples must be an array of numbers")?;
        return Ok(Some(InputLine::Samples(samples)));
    }

    if object.contains_key("command") {
        let command: DebugCommand =
            serde_json::from_value(value.clone()).context("invalid command")?;
        return Ok(Some(InputLine::Command(command)));
    }

    bail!("unrecognised input: {}", line)
}
