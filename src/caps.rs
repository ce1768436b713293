//! Caps handling and negotiated audio parameters.
//!
//! The element is codec agnostic: payloads pass through untouched, and caps
//! only matter for timing math (bytes per sample and frame size). Negotiated
//! caps are mirrored verbatim onto the source port.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TransceiverConfig;
use crate::error::{TransceiverError, TransceiverResult};

/// Media type for raw interleaved PCM.
pub const MEDIA_TYPE_RAW: &str = "audio/x-raw";
/// Media type for mu-law companded audio.
pub const MEDIA_TYPE_MULAW: &str = "audio/x-mulaw";
/// Media type for A-law companded audio.
pub const MEDIA_TYPE_ALAW: &str = "audio/x-alaw";

/// Minimum supported sample rate (8kHz telephony).
pub const MIN_SAMPLE_RATE: u32 = 8000;
/// Maximum supported sample rate (48kHz).
pub const MAX_SAMPLE_RATE: u32 = 48000;

/// Raw PCM format tags accepted on the sink port.
pub const RAW_FORMATS: &[&str] = &["S16LE", "S16BE", "S32LE", "S32BE", "F32LE", "F32BE"];

/// Negotiated media-format descriptor as delivered by the host pipeline.
///
/// Fields are optional because the host may omit them; the adapter fails
/// negotiation when rate or channels are absent and falls back with a
/// warning for unknown format tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caps {
    /// Media type, e.g. `audio/x-raw` or `audio/x-mulaw`.
    pub media_type: String,
    /// Sample format tag for raw PCM, e.g. `S16LE`.
    pub format: Option<String>,
    /// Sample rate in Hz.
    pub rate: Option<u32>,
    /// Channel count.
    pub channels: Option<u32>,
}

impl Caps {
    /// Raw PCM caps with the given format tag.
    pub fn raw(format: &str, rate: u32, channels: u32) -> Self {
        Self {
            media_type: MEDIA_TYPE_RAW.to_string(),
            format: Some(format.to_string()),
            rate: Some(rate),
            channels: Some(channels),
        }
    }

    /// Mu-law caps.
    pub fn mulaw(rate: u32, channels: u32) -> Self {
        Self {
            media_type: MEDIA_TYPE_MULAW.to_string(),
            format: None,
            rate: Some(rate),
            channels: Some(channels),
        }
    }

    /// A-law caps.
    pub fn alaw(rate: u32, channels: u32) -> Self {
        Self {
            media_type: MEDIA_TYPE_ALAW.to_string(),
            format: None,
            rate: Some(rate),
            channels: Some(channels),
        }
    }
}

/// Audio parameters resolved from caps negotiation.
///
/// Read-only once `caps_ready` is set; replaced wholesale by the next caps
/// event or lifecycle reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParams {
    /// Negotiated media type.
    pub media_type: String,
    /// Negotiated format tag, if the media type carries one.
    pub format: Option<String>,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Bytes per sample per channel. Zero until caps negotiation.
    pub bytes_per_sample: u32,
    /// Frame duration in milliseconds.
    pub frame_duration_ms: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        AudioParams::from_config(&TransceiverConfig::default())
    }
}

impl AudioParams {
    /// Pre-negotiation parameters derived from the configuration.
    pub fn from_config(config: &TransceiverConfig) -> Self {
        Self {
            media_type: MEDIA_TYPE_RAW.to_string(),
            format: None,
            rate: config.sample_rate,
            channels: config.channels,
            bytes_per_sample: 0,
            frame_duration_ms: config.frame_duration_ms,
        }
    }

    /// Resolve parameters from negotiated caps.
    ///
    /// Fails when rate or channels are missing. Unknown formats fall back to
    /// one byte per sample with a warning so an unexpected peer format never
    /// kills the stream.
    pub fn from_caps(caps: &Caps, frame_duration_ms: u32) -> TransceiverResult<Self> {
        let rate = caps
            .rate
            .ok_or_else(|| TransceiverError::Caps("caps missing rate".to_string()))?;
        let channels = caps
            .channels
            .ok_or_else(|| TransceiverError::Caps("caps missing channels".to_string()))?;

        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
            warn!(rate, "sample rate outside the supported 8000..=48000 range");
        }

        let bytes_per_sample = match caps.media_type.as_str() {
            MEDIA_TYPE_RAW => match caps.format.as_deref() {
                Some("S16LE") | Some("S16BE") => 2,
                Some("S32LE") | Some("S32BE") | Some("F32LE") | Some("F32BE") => 4,
                Some(other) => {
                    warn!(format = other, "unknown raw format, assuming 1 byte/sample");
                    1
                }
                None => {
                    warn!("raw caps without format tag, assuming 1 byte/sample");
                    1
                }
            },
            MEDIA_TYPE_MULAW | MEDIA_TYPE_ALAW => 1,
            other => {
                warn!(media_type = other, "unknown media type, assuming 1 byte/sample");
                1
            }
        };

        Ok(Self {
            media_type: caps.media_type.clone(),
            format: caps.format.clone(),
            rate,
            channels,
            bytes_per_sample,
            frame_duration_ms,
        })
    }

    /// Frame duration as a [`Duration`].
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_duration_ms))
    }

    /// Size of one frame in bytes at the negotiated parameters.
    pub fn frame_size_bytes(&self) -> u32 {
        self.rate * self.bytes_per_sample * self.channels * self.frame_duration_ms / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16le_two_bytes_per_sample() {
        let caps = Caps::raw("S16LE", 16000, 1);
        let params = AudioParams::from_caps(&caps, 20).unwrap();
        assert_eq!(params.bytes_per_sample, 2);
        assert_eq!(params.frame_size_bytes(), 640);
    }

    #[test]
    fn test_wide_formats_four_bytes_per_sample() {
        for format in ["S32LE", "S32BE", "F32LE", "F32BE"] {
            let caps = Caps::raw(format, 48000, 2);
            let params = AudioParams::from_caps(&caps, 10).unwrap();
            assert_eq!(params.bytes_per_sample, 4, "{format}");
            assert_eq!(params.frame_size_bytes(), 48000 * 4 * 2 / 100);
        }
    }

    #[test]
    fn test_companded_one_byte_per_sample() {
        let params = AudioParams::from_caps(&Caps::mulaw(8000, 1), 250).unwrap();
        assert_eq!(params.bytes_per_sample, 1);
        assert_eq!(params.frame_size_bytes(), 2000);

        let params = AudioParams::from_caps(&Caps::alaw(8000, 1), 250).unwrap();
        assert_eq!(params.bytes_per_sample, 1);
    }

    #[test]
    fn test_unknown_format_falls_back() {
        let caps = Caps::raw("S24LE", 16000, 1);
        let params = AudioParams::from_caps(&caps, 20).unwrap();
        assert_eq!(params.bytes_per_sample, 1);

        let caps = Caps {
            media_type: "audio/x-opus".to_string(),
            format: None,
            rate: Some(48000),
            channels: Some(2),
        };
        let params = AudioParams::from_caps(&caps, 20).unwrap();
        assert_eq!(params.bytes_per_sample, 1);
    }

    #[test]
    fn test_missing_fields_fail() {
        let caps = Caps {
            media_type: MEDIA_TYPE_RAW.to_string(),
            format: Some("S16LE".to_string()),
            rate: None,
            channels: Some(1),
        };
        let err = AudioParams::from_caps(&caps, 20).unwrap_err();
        assert!(matches!(err, TransceiverError::Caps(_)));

        let caps = Caps {
            media_type: MEDIA_TYPE_RAW.to_string(),
            format: Some("S16LE".to_string()),
            rate: Some(16000),
            channels: None,
        };
        assert!(AudioParams::from_caps(&caps, 20).is_err());
    }

    #[test]
    fn test_from_config_pre_negotiation() {
        let params = AudioParams::from_config(&TransceiverConfig::default());
        assert_eq!(params.rate, 16000);
        assert_eq!(params.bytes_per_sample, 0);
        assert_eq!(params.frame_size_bytes(), 0);
    }
}
