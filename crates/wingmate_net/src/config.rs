//! # Session Configuration
//!
//! Per-session tunables. Every field has a default, so a TOML file only needs
//! the values it changes:
//!
//! ```toml
//! display_name = "Ace"
//! team = "pink"
//! interpolation_delay_ms = 150
//! ```

use std::path::Path;

use serde::Deserialize;
use wingmate_shared::constants::{
    DEFAULT_TICK_RATE, EXTRAPOLATION_LIMIT_MS, HEARTBEAT_INTERVAL_MS, INTERPOLATION_BUFFER_LEN,
    INTERPOLATION_DELAY_MS, JOIN_TIMEOUT_MS, MAX_CHAT_LENGTH, MAX_MISSED_HEARTBEATS, MAX_PEERS,
    TYPING_TIMEOUT_MS,
};
use wingmate_shared::Team;

use crate::error::ConfigError;
use crate::lobby::FALLBACK_DISPLAY_NAME;
use crate::registry::ReplicaSettings;

/// Inbound queue capacity used when none is configured.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Scene a fresh host starts in.
pub const DEFAULT_SCENE: &str = "Level_01";

/// Configuration for one [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name shown to other peers.
    pub display_name: String,
    /// Initial team.
    pub team: Team,
    /// Ticks per second the caller intends to drive the session at.
    pub tick_rate: u32,
    /// Lobby capacity, host included. Enforced by the host.
    pub max_peers: usize,
    /// How long a blocking join waits for the manifest.
    pub join_timeout_ms: u64,
    /// Interval between heartbeats from an idle peer.
    pub heartbeat_interval_ms: u64,
    /// Missed intervals before a peer times out.
    pub max_missed_heartbeats: u32,
    /// Typing flag expiry on receivers.
    pub typing_timeout_ms: u64,
    /// Chat truncation length in characters.
    pub max_chat_length: usize,
    /// Replica render delay.
    pub interpolation_delay_ms: u64,
    /// Replica extrapolation cap.
    pub extrapolation_limit_ms: u64,
    /// Samples kept per replica.
    pub interpolation_buffer_len: usize,
    /// Inbound frames queued between ticks before eviction starts.
    pub inbound_queue_capacity: usize,
    /// Scene a host starts in.
    pub initial_scene: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: FALLBACK_DISPLAY_NAME.to_string(),
            team: Team::default(),
            tick_rate: DEFAULT_TICK_RATE,
            max_peers: MAX_PEERS,
            join_timeout_ms: JOIN_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            max_missed_heartbeats: MAX_MISSED_HEARTBEATS,
            typing_timeout_ms: TYPING_TIMEOUT_MS,
            max_chat_length: MAX_CHAT_LENGTH,
            interpolation_delay_ms: INTERPOLATION_DELAY_MS,
            extrapolation_limit_ms: EXTRAPOLATION_LIMIT_MS,
            interpolation_buffer_len: INTERPOLATION_BUFFER_LEN,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            initial_scene: DEFAULT_SCENE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Default configuration with a display name and team.
    #[must_use]
    pub fn named(display_name: impl Into<String>, team: Team) -> Self {
        Self { display_name: display_name.into(), team, ..Self::default() }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`SessionConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be at least 1".into()));
        }
        if self.interpolation_buffer_len < 2 {
            return Err(ConfigError::Invalid("interpolation_buffer_len must be at least 2".into()));
        }
        if self.heartbeat_interval_ms == 0 || self.max_missed_heartbeats == 0 {
            return Err(ConfigError::Invalid("heartbeat settings must be positive".into()));
        }
        if self.max_chat_length == 0 {
            return Err(ConfigError::Invalid("max_chat_length must be positive".into()));
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("inbound_queue_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Interpolation settings for replicas.
    #[must_use]
    pub const fn replica_settings(&self) -> ReplicaSettings {
        ReplicaSettings {
            buffer_len: self.interpolation_buffer_len,
            delay_ms: self.interpolation_delay_ms,
            extrapolation_limit_ms: self.extrapolation_limit_ms,
        }
    }

    /// Milliseconds between ticks at the configured rate.
    #[must_use]
    pub fn tick_interval_ms(&self) -> u64 {
        (1000 / u64::from(self.tick_rate.max(1))).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            display_name = "Ace"
            team = "pink"
            interpolation_delay_ms = 150
            "#,
        )
        .unwrap();
        assert_eq!(config.display_name, "Ace");
        assert_eq!(config.team, Team::Pink);
        assert_eq!(config.interpolation_delay_ms, 150);
        assert_eq!(config.max_chat_length, MAX_CHAT_LENGTH);
        assert_eq!(config.replica_settings().extrapolation_limit_ms, EXTRAPOLATION_LIMIT_MS);
    }

    #[test]
    fn test_rejects_tiny_buffer() {
        let err = SessionConfig::from_toml_str("interpolation_buffer_len = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_toml() {
        let err = SessionConfig::from_toml_str("team = 7").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = SessionConfig::load("/nonexistent/wingmate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(SessionConfig::default().tick_interval_ms(), 16);
    }
}
