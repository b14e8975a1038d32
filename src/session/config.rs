//! Session configuration
//!
//! A [`SessionConfig`] is fixed for the lifetime of a session manager, with the
//! exception of the preferred buffer size which can be changed while running.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the channel count of the processing callback
pub const MAX_CHANNELS: u16 = 32;

/// Upper bound on the preferred buffer size. 100 ms at 192 kHz is 19200 frames,
/// inside the largest tick the bridge accepts.
pub const MAX_BUFFER_SIZE_MS: u32 = 100;

/// Errors produced when validating a [`SessionConfig`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("channel count must be at least 1")]
    NoChannels,

    #[error("channel count {0} exceeds the maximum of {max}", max = MAX_CHANNELS)]
    TooManyChannels(u16),

    #[error("preferred buffer size must be greater than 0 ms")]
    ZeroBufferSize,

    #[error("preferred buffer size {0} ms exceeds the maximum of {max} ms", max = MAX_BUFFER_SIZE_MS)]
    BufferSizeTooLarge(u32),
}

/// Check a preferred buffer size on its own
pub(crate) fn validate_buffer_size(buffer_size_ms: u32) -> Result<(), ConfigError> {
    if buffer_size_ms == 0 {
        return Err(ConfigError::ZeroBufferSize);
    }
    if buffer_size_ms > MAX_BUFFER_SIZE_MS {
        return Err(ConfigError::BufferSizeTooLarge(buffer_size_ms));
    }
    Ok(())
}

/// Audio session category, selecting how the platform treats this session.
///
/// Audio input is only delivered for the categories that record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionCategory {
    /// Mixes with other audio, silenced by the ringer switch
    Ambient,
    /// Like `Ambient`, but interrupts other audio
    SoloAmbient,
    #[default]
    Playback,
    Record,
    PlayAndRecord,
    MultiRoute,
}

impl SessionCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ambient => "Ambient",
            Self::SoloAmbient => "Solo Ambient",
            Self::Playback => "Playback",
            Self::Record => "Record",
            Self::PlayAndRecord => "Play and Record",
            Self::MultiRoute => "Multi Route",
        }
    }

    /// Whether the hardware should capture input for this category
    pub fn has_input(&self) -> bool {
        matches!(self, Self::Record | Self::PlayAndRecord | Self::MultiRoute)
    }

    /// Whether the hardware renders output for this category
    pub fn has_output(&self) -> bool {
        !matches!(self, Self::Record)
    }
}

/// What to do when the gateway reports an audio route change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RouteChangePolicy {
    /// Renegotiate on every route change
    #[default]
    Always,
    /// Renegotiate only when the hardware format differs from the active one
    OnFormatChange,
}

/// Caller preferences for an audio session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub category: SessionCategory,

    /// Preferred hardware buffer duration in milliseconds
    pub preferred_buffer_size_ms: u32,

    /// Preferred minimum sample rate in Hz
    pub preferred_min_sample_rate: u32,

    /// Number of channels in the processing callback
    pub channels: u16,

    pub route_change_policy: RouteChangePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // 12 ms lands on 512 frames at 44.1/48 kHz on most hardware
        Self {
            category: SessionCategory::default(),
            preferred_buffer_size_ms: 12,
            preferred_min_sample_rate: 44100,
            channels: 2,
            route_change_policy: RouteChangePolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(
        category: SessionCategory,
        preferred_buffer_size_ms: u32,
        preferred_min_sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            category,
            preferred_buffer_size_ms,
            preferred_min_sample_rate,
            channels,
            route_change_policy: RouteChangePolicy::default(),
        }
    }

    pub fn with_route_change_policy(mut self, policy: RouteChangePolicy) -> Self {
        self.route_change_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self.channels > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels(self.channels));
        }
        validate_buffer_size(self.preferred_buffer_size_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_channels() {
        let config = SessionConfig::new(SessionCategory::Playback, 12, 44100, 0);
        assert_eq!(config.validate(), Err(ConfigError::NoChannels));
    }

    #[test]
    fn test_rejects_too_many_channels() {
        let config = SessionConfig::new(SessionCategory::Playback, 12, 44100, MAX_CHANNELS + 1);
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyChannels(MAX_CHANNELS + 1))
        );
    }

    #[test]
    fn test_rejects_zero_buffer_size() {
        let config = SessionConfig::new(SessionCategory::Playback, 0, 44100, 2);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBufferSize));
    }

    #[test]
    fn test_rejects_oversized_buffer() {
        let config = SessionConfig::new(SessionCategory::Playback, 1000, 44100, 2);
        assert_eq!(config.validate(), Err(ConfigError::BufferSizeTooLarge(1000)));

        let config = SessionConfig::new(SessionCategory::Playback, MAX_BUFFER_SIZE_MS, 44100, 2);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_category_io() {
        assert!(SessionCategory::PlayAndRecord.has_input());
        assert!(SessionCategory::PlayAndRecord.has_output());
        assert!(!SessionCategory::Playback.has_input());
        assert!(!SessionCategory::Record.has_output());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"channels": 1}"#).unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.preferred_buffer_size_ms, 12);
        assert_eq!(config.route_change_policy, RouteChangePolicy::Always);
    }
}
