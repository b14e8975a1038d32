//! Parameter negotiation
//!
//! Reconciles the caller's preferences with what the hardware actually granted
//! and publishes the result to the render path as one immutable snapshot.

use std::sync::Arc;

use thiserror::Error;

use super::bridge::RenderShared;
use super::config::SessionConfig;
use crate::gateway::{GatewayError, GrantedFormat, HardwareRequest};

/// Largest tick the bridge will accept, in frames
pub const MAX_FRAMES_PER_TICK: usize = 32768;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NegotiationError {
    #[error("Hardware reported an unusable sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Hardware reported an unusable buffer duration: {0} ms")]
    InvalidBufferDuration(f64),

    #[error("Negotiated tick size {0} is outside 1..={max} frames", max = MAX_FRAMES_PER_TICK)]
    FrameCount(usize),

    #[error("Gateway error during negotiation: {0}")]
    Gateway(#[from] GatewayError),
}

/// The operating parameters the render path runs with.
///
/// Replaced wholesale on every negotiation, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiatedParameters {
    pub sample_rate: u32,
    pub frames_per_tick: usize,
    pub channels: usize,
    /// Buffer duration the hardware granted, in milliseconds
    pub buffer_duration_ms: f64,
    /// The granted rate is below the preferred minimum
    pub degraded: bool,
}

/// Computes and publishes [`NegotiatedParameters`]. Control domain only.
pub struct ParameterNegotiator {
    shared: Arc<RenderShared>,
    /// Previous snapshot, kept so a guard released on the render thread never
    /// drops the last reference
    retired: Option<Arc<NegotiatedParameters>>,
    negotiations: u64,
}

impl ParameterNegotiator {
    pub(crate) fn new(shared: Arc<RenderShared>) -> Self {
        Self {
            shared,
            retired: None,
            negotiations: 0,
        }
    }

    /// Build the hardware request for the current preferences
    pub fn request(config: &SessionConfig) -> HardwareRequest {
        HardwareRequest {
            category: config.category,
            buffer_duration_ms: config.preferred_buffer_size_ms as f64,
            min_sample_rate: config.preferred_min_sample_rate,
            channels: config.channels,
        }
    }

    /// Derive operating parameters from what the hardware granted.
    ///
    /// A granted rate below the preferred minimum is not an error; the result is
    /// flagged `degraded` and carries the lower rate.
    pub fn negotiate(
        config: &SessionConfig,
        granted: &GrantedFormat,
    ) -> Result<NegotiatedParameters, NegotiationError> {
        if !granted.sample_rate.is_finite() || granted.sample_rate < 1.0 {
            return Err(NegotiationError::InvalidSampleRate(granted.sample_rate));
        }
        if !granted.buffer_duration_ms.is_finite() || granted.buffer_duration_ms <= 0.0 {
            return Err(NegotiationError::InvalidBufferDuration(
                granted.buffer_duration_ms,
            ));
        }

        let sample_rate = granted.sample_rate.round() as u32;
        let frames = (granted.sample_rate * granted.buffer_duration_ms / 1000.0).round() as usize;
        if frames == 0 || frames > MAX_FRAMES_PER_TICK {
            return Err(NegotiationError::FrameCount(frames));
        }

        Ok(NegotiatedParameters {
            sample_rate,
            frames_per_tick: frames,
            channels: config.channels as usize,
            buffer_duration_ms: granted.buffer_duration_ms,
            degraded: sample_rate < config.preferred_min_sample_rate,
        })
    }

    /// Negotiate and, on success, swap the result in for the render path
    pub fn apply(
        &mut self,
        config: &SessionConfig,
        granted: &GrantedFormat,
    ) -> Result<Arc<NegotiatedParameters>, NegotiationError> {
        let params = Self::negotiate(config, granted)?;
        self.negotiations += 1;

        if params.degraded {
            log::warn!(
                "Hardware granted {} Hz, below the preferred minimum of {} Hz",
                params.sample_rate,
                config.preferred_min_sample_rate
            );
        }
        log::info!(
            "Negotiated {} Hz, {} frames/tick ({:.2} ms), {} channel(s)",
            params.sample_rate,
            params.frames_per_tick,
            params.buffer_duration_ms,
            params.channels
        );

        let params = Arc::new(params);
        self.retired = self.shared.parameters();
        self.shared.publish(Arc::clone(&params));
        Ok(params)
    }

    /// Whether `granted` would change the active negotiation
    pub fn differs_from_current(&self, granted: &GrantedFormat) -> bool {
        match self.shared.parameters() {
            Some(current) => {
                current.sample_rate != granted.sample_rate.round() as u32
                    || (current.buffer_duration_ms - granted.buffer_duration_ms).abs() > 1e-6
            }
            None => true,
        }
    }

    pub fn current(&self) -> Option<Arc<NegotiatedParameters>> {
        self.shared.parameters()
    }

    /// Number of successful negotiations so far
    pub fn negotiations(&self) -> u64 {
        self.negotiations
    }
}
