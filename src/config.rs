//! Transceiver configuration.
//!
//! All options carry the defaults of the original element and are validated
//! once, on entry to the `Prepared` state. Audio-facing options can also be
//! adjusted at runtime through the element accessors; transport-facing
//! options are frozen once the worker is running.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{TransceiverError, TransceiverResult};

/// Default audio sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
/// Default channel count.
pub const DEFAULT_CHANNELS: u32 = 1;
/// Default frame duration in milliseconds.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 250;
/// Default receive queue capacity in frames.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// Default number of frames accumulated before playback starts.
pub const DEFAULT_INITIAL_BUFFER_COUNT: usize = 3;
/// Default delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_RECONNECT_DELAY_MS: u64 = 1000;
/// Default backoff ceiling.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30000;
/// Default reconnect attempt limit (0 means unlimited).
pub const DEFAULT_MAX_RECONNECTS: u32 = 10;

/// Configuration record for a [`crate::WsTransceiver`].
///
/// `uri` is the only required option; everything else has a usable default.
///
/// # Example
///
/// ```rust
/// use ws_audio_transceiver::TransceiverConfig;
///
/// let config = TransceiverConfig {
///     uri: Some("ws://127.0.0.1:9999".to_string()),
///     frame_duration_ms: 20,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransceiverConfig {
    /// WebSocket URI to connect to (`ws://` or `wss://`). Required.
    pub uri: Option<String>,

    /// Audio sample rate in Hz. Overridden by caps negotiation.
    pub sample_rate: u32,

    /// Number of audio channels (1 or 2). Overridden by caps negotiation.
    pub channels: u32,

    /// Frame duration in milliseconds (10 to 1000).
    pub frame_duration_ms: u32,

    /// Receive queue capacity in frames (1 to 1000). When full, the oldest
    /// frame is dropped to make room.
    pub max_queue_size: usize,

    /// Frames to accumulate before playback starts (0 to 100, 0 disables
    /// the jitter reserve).
    pub initial_buffer_count: usize,

    /// Reconnect automatically when the connection is lost.
    pub reconnect_enabled: bool,

    /// Delay before the first reconnect attempt, in milliseconds
    /// (100 to 5000).
    pub initial_reconnect_delay_ms: u64,

    /// Backoff ceiling in milliseconds (1000 to 60000).
    pub max_backoff_ms: u64,

    /// Maximum reconnect attempts per activation (0 to 100, 0 means
    /// unlimited while reconnect is enabled).
    pub max_reconnects: u32,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            uri: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            initial_buffer_count: DEFAULT_INITIAL_BUFFER_COUNT,
            reconnect_enabled: true,
            initial_reconnect_delay_ms: DEFAULT_INITIAL_RECONNECT_DELAY_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
        }
    }
}

impl TransceiverConfig {
    /// Validate the configuration. Called on entry to `Prepared`.
    pub fn validate(&self) -> TransceiverResult<()> {
        let uri = self
            .uri
            .as_deref()
            .ok_or_else(|| TransceiverError::Config("no uri set".to_string()))?;

        let parsed = Url::parse(uri)
            .map_err(|e| TransceiverError::Config(format!("invalid uri {uri:?}: {e}")))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            scheme => {
                return Err(TransceiverError::Config(format!(
                    "unsupported uri scheme {scheme:?}, expected ws or wss"
                )));
            }
        }

        if self.sample_rate == 0 {
            return Err(TransceiverError::Config(
                "sample-rate must be greater than 0".to_string(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(TransceiverError::Config(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if !(10..=1000).contains(&self.frame_duration_ms) {
            return Err(TransceiverError::Config(format!(
                "frame-duration-ms must be in 10..=1000, got {}",
                self.frame_duration_ms
            )));
        }
        if !(1..=1000).contains(&self.max_queue_size) {
            return Err(TransceiverError::Config(format!(
                "max-queue-size must be in 1..=1000, got {}",
                self.max_queue_size
            )));
        }
        if self.initial_buffer_count > 100 {
            return Err(TransceiverError::Config(format!(
                "initial-buffer-count must be in 0..=100, got {}",
                self.initial_buffer_count
            )));
        }
        if !(100..=5000).contains(&self.initial_reconnect_delay_ms) {
            return Err(TransceiverError::Config(format!(
                "initial-reconnect-delay-ms must be in 100..=5000, got {}",
                self.initial_reconnect_delay_ms
            )));
        }
        if !(1000..=60000).contains(&self.max_backoff_ms) {
            return Err(TransceiverError::Config(format!(
                "max-backoff-ms must be in 1000..=60000, got {}",
                self.max_backoff_ms
            )));
        }
        if self.max_reconnects > 100 {
            return Err(TransceiverError::Config(format!(
                "max-reconnects must be in 0..=100, got {}",
                self.max_reconnects
            )));
        }

        Ok(())
    }

    /// Frame duration as a [`Duration`].
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_duration_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransceiverConfig::default();
        assert!(config.uri.is_none());
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_duration_ms, 250);
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.initial_buffer_count, 3);
        assert!(config.reconnect_enabled);
        assert_eq!(config.initial_reconnect_delay_ms, 1000);
        assert_eq!(config.max_backoff_ms, 30000);
        assert_eq!(config.max_reconnects, 10);
    }

    #[test]
    fn test_validate_requires_uri() {
        let config = TransceiverConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TransceiverError::Config(_)));
    }

    #[test]
    fn test_validate_accepts_ws_and_wss() {
        for uri in ["ws://127.0.0.1:9999", "wss://example.com/audio"] {
            let config = TransceiverConfig {
                uri: Some(uri.to_string()),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "{uri} should validate");
        }
    }

    #[test]
    fn test_validate_rejects_other_schemes() {
        let config = TransceiverConfig {
            uri: Some("https://example.com".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransceiverConfig {
            uri: Some("not a uri".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let base = TransceiverConfig {
            uri: Some("ws://127.0.0.1:9999".to_string()),
            ..Default::default()
        };

        let config = TransceiverConfig {
            frame_duration_ms: 5,
            ..base.clone()
        };
        assert!(config.validate().is_err());

        let config = TransceiverConfig {
            channels: 3,
            ..base.clone()
        };
        assert!(config.validate().is_err());

        let config = TransceiverConfig {
            max_queue_size: 0,
            ..base.clone()
        };
        assert!(config.validate().is_err());

        let config = TransceiverConfig {
            initial_reconnect_delay_ms: 50,
            ..base.clone()
        };
        assert!(config.validate().is_err());

        let config = TransceiverConfig {
            max_backoff_ms: 500,
            ..base
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_duration() {
        let config = TransceiverConfig {
            frame_duration_ms: 20,
            ..Default::default()
        };
        assert_eq!(config.frame_duration(), Duration::from_millis(20));
    }
}
