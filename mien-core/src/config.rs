// Layered configuration for the mien avatar core

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Presence feed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Websocket URL of the presence sensor
    pub url: String,

    /// Open the feed at startup. When false the feed is never opened.
    pub auto_connect: bool,

    /// Let presence drive the face (sleeping/kawaii edges)
    pub detection_enabled: bool,

    /// Request a transport connect when someone arrives and a disconnect when they leave
    pub auto_connect_on_presence: bool,

    /// Fixed delay between a close and the next connection attempt
    pub reconnect_interval_ms: u64,

    /// Handshake timeout (0 disables it)
    pub connect_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/ws".to_string(),
            auto_connect: true,
            detection_enabled: true,
            auto_connect_on_presence: true,
            reconnect_interval_ms: 5000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl PresenceConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.connect_timeout_ms))
        }
    }
}

/// Face timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// How long a transient expression lasts before returning to resting
    pub expression_reset_ms: u64,
    /// Eyes-closed time of a single blink
    pub blink_duration_ms: u64,
    /// Upper bound of the random delay before the first blink
    pub first_blink_max_ms: u64,
    pub blink_interval_min_ms: u64,
    pub blink_interval_max_ms: u64,
    /// Probability (0..=1) that a blink is followed quickly by another
    pub double_blink_chance: f64,
    pub double_blink_delay_ms: u64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            expression_reset_ms: 3000,
            blink_duration_ms: 150,
            first_blink_max_ms: 10_000,
            blink_interval_min_ms: 8000,
            blink_interval_max_ms: 11_000,
            double_blink_chance: 0.2,
            double_blink_delay_ms: 300,
        }
    }
}

impl FaceConfig {
    pub fn expression_reset(&self) -> Duration {
        Duration::from_millis(self.expression_reset_ms)
    }

    pub fn blink_duration(&self) -> Duration {
        Duration::from_millis(self.blink_duration_ms)
    }
}

/// Loudness sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessConfig {
    /// Average spectrum byte above which audio counts as loud
    pub threshold: u8,
    pub sample_interval_ms: u64,
    /// FFT window size, power of two in 32..=32768
    pub fft_size: usize,
    /// Temporal smoothing constant (0..1)
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            threshold: 70,
            sample_interval_ms: 50,
            fft_size: 32,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl LoudnessConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Complete mien configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MienConfig {
    pub log_level: String,
    pub presence: PresenceConfig,
    pub face: FaceConfig,
    pub loudness: LoudnessConfig,
}

impl Default for MienConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            presence: PresenceConfig::default(),
            face: FaceConfig::default(),
            loudness: LoudnessConfig::default(),
        }
    }
}

impl MienConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from string (JSON, then TOML, then YAML)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<MienConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<MienConfig>(content) {
            return Ok(config);
        }

        // YAML accepts almost any scalar, so only take it when it yields a mapping
        match serde_yaml::from_str::<serde_yaml::Value>(content) {
            Ok(value) if value.is_mapping() => serde_yaml::from_value::<MienConfig>(value)
                .map_err(|e| ConfigError::ParseError(e.to_string())),
            _ => Err(ConfigError::ParseError(
                "Unknown format (expected JSON, TOML or YAML)".to_string(),
            )),
        }
    }

    /// Apply `MIEN_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (used by tests)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MIEN_PRESENCE_URL") {
            self.presence.url = url;
        }

        if let Some(raw) = lookup("MIEN_PRESENCE_AUTO_CONNECT") {
            match parse_flag(&raw) {
                Some(v) => self.presence.auto_connect = v,
                None => warn!("Ignoring MIEN_PRESENCE_AUTO_CONNECT={}", raw),
            }
        }

        if let Some(raw) = lookup("MIEN_PRESENCE_DETECTION") {
            match parse_flag(&raw) {
                Some(v) => self.presence.detection_enabled = v,
                None => warn!("Ignoring MIEN_PRESENCE_DETECTION={}", raw),
            }
        }

        if let Some(level) = lookup("MIEN_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.presence.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "presence.url must be a ws:// or wss:// URL, got '{}'",
                url
            )));
        }

        if self.presence.reconnect_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "presence.reconnect_interval_ms must be > 0".to_string(),
            ));
        }

        let face = &self.face;
        if face.expression_reset_ms == 0 || face.blink_duration_ms == 0 {
            return Err(ConfigError::ValidationError(
                "face durations must be > 0".to_string(),
            ));
        }

        if face.blink_interval_min_ms > face.blink_interval_max_ms {
            return Err(ConfigError::ValidationError(
                "face.blink_interval_min_ms cannot be greater than blink_interval_max_ms"
                    .to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&face.double_blink_chance) {
            return Err(ConfigError::ValidationError(
                "face.double_blink_chance must be within 0..=1".to_string(),
            ));
        }

        let loudness = &self.loudness;
        if !loudness.fft_size.is_power_of_two() || !(32..=32768).contains(&loudness.fft_size) {
            return Err(ConfigError::ValidationError(format!(
                "loudness.fft_size must be a power of two in 32..=32768, got {}",
                loudness.fft_size
            )));
        }

        if loudness.sample_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "loudness.sample_interval_ms must be > 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&loudness.smoothing) {
            return Err(ConfigError::ValidationError(
                "loudness.smoothing must be within 0..1".to_string(),
            ));
        }

        if loudness.min_decibels >= loudness.max_decibels {
            return Err(ConfigError::ValidationError(
                "loudness.min_decibels must be below max_decibels".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
