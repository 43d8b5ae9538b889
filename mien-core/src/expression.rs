//! Facial expressions and the published avatar state

use crate::error::MienError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Facial expression shown by the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    /// Neutral baseline face
    #[default]
    Resting,
    /// The user is talking
    Listening,
    /// Waiting on the bot
    Thinking,
    /// Eyes closed by the shape itself
    Laughing,
    Nervous,
    /// Startup and greeting cue
    Kawaii,
    /// Nobody around
    Sleeping,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Resting,
        Expression::Listening,
        Expression::Thinking,
        Expression::Laughing,
        Expression::Nervous,
        Expression::Kawaii,
        Expression::Sleeping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Resting => "resting",
            Expression::Listening => "listening",
            Expression::Thinking => "thinking",
            Expression::Laughing => "laughing",
            Expression::Nervous => "nervous",
            Expression::Kawaii => "kawaii",
            Expression::Sleeping => "sleeping",
        }
    }

    /// Whether the face keeps its eyes closed, so blinking must stay off
    pub fn suppresses_blink(&self) -> bool {
        matches!(self, Expression::Laughing | Expression::Sleeping)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expression {
    type Err = MienError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| MienError::InvalidValue(format!("unknown expression '{}'", s)))
    }
}

/// Everything a renderer needs to draw the face.
///
/// There is exactly one writer (the face driver); renderers and debug panels
/// only ever see clones of it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AvatarState {
    pub expression: Expression,
    pub talking: bool,
    pub is_loud: bool,
    pub is_blinking: bool,
    pub showing_text: bool,
    /// Ignored by renderers while `showing_text` is false
    pub display_text: String,
}

impl AvatarState {
    /// Mouth animation runs only while the bot talks and its audio is loud
    pub fn mouth_moving(&self) -> bool {
        self.talking && self.is_loud
    }

    pub fn visible_text(&self) -> Option<&str> {
        if self.showing_text && !self.display_text.is_empty() {
            Some(&self.display_text)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_round_trips_through_names() {
        for expression in Expression::ALL {
            assert_eq!(expression.as_str().parse::<Expression>().unwrap(), expression);
        }
        assert!("grumpy".parse::<Expression>().is_err());
        assert!("Resting".parse::<Expression>().is_err());
    }

    #[test]
    fn test_expression_serde_is_lowercase() {
        let json = serde_json::to_string(&Expression::Kawaii).unwrap();
        assert_eq!(json, "\"kawaii\"");
        let parsed: Expression = serde_json::from_str("\"sleeping\"").unwrap();
        assert_eq!(parsed, Expression::Sleeping);
    }

    #[test]
    fn test_blink_suppression() {
        assert!(Expression::Laughing.suppresses_blink());
        assert!(Expression::Sleeping.suppresses_blink());
        assert!(!Expression::Resting.suppresses_blink());
        assert!(!Expression::Kawaii.suppresses_blink());
    }

    #[test]
    fn test_default_state() {
        let state = AvatarState::default();
        assert_eq!(state.expression, Expression::Resting);
        assert!(!state.talking);
        assert!(!state.is_loud);
        assert!(!state.is_blinking);
        assert!(!state.showing_text);
        assert!(state.display_text.is_empty());
    }

    #[test]
    fn test_visible_text_respects_flag() {
        let mut state = AvatarState {
            display_text: "hello".to_string(),
            ..Default::default()
        };
        assert_eq!(state.visible_text(), None);
        state.showing_text = true;
        assert_eq!(state.visible_text(), Some("hello"));
    }

    #[test]
    fn test_mouth_needs_talking_and_loud() {
        let mut state = AvatarState::default();
        state.talking = true;
        assert!(!state.mouth_moving());
        state.is_loud = true;
        assert!(state.mouth_moving());
    }
}
