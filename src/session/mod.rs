//! Session module - lifecycle, negotiation and the real-time bridge
//!
//! This module provides:
//! - Session configuration and state
//! - Parameter negotiation against what the hardware grants
//! - The real-time callback bridge driven by a gateway's tick source
//! - The session state machine tying them together

mod bridge;
mod config;
mod error;
mod manager;
mod negotiator;
mod state;

#[cfg(test)]
pub(crate) use bridge::RenderShared;
pub use bridge::{AudioProcessor, BufferView, RenderStats, Renderer};
pub use config::{
    ConfigError, RouteChangePolicy, SessionCategory, SessionConfig, MAX_BUFFER_SIZE_MS,
    MAX_CHANNELS,
};
pub use error::SessionError;
pub use manager::{SessionDelegate, SessionManager};
pub use negotiator::{
    NegotiatedParameters, NegotiationError, ParameterNegotiator, MAX_FRAMES_PER_TICK,
};
pub use state::SessionState;
