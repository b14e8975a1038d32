//! Hardware session gateway - the platform audio service boundary
//!
//! This module provides:
//! - The [`HardwareGateway`] capability trait the session manager drives
//! - A cpal-backed gateway for real devices
//! - A deterministic fake gateway for tests and headless hosts

mod cpal_backend;
mod fake;
mod ring;

pub use cpal_backend::CpalGateway;
pub use fake::{FakeGateway, TickOutput};
pub use ring::{InputConsumer, InputProducer, InputRing, NotificationQueue, NotificationSender};

use thiserror::Error;

use crate::session::{Renderer, SessionCategory};

/// Errors reported by a hardware gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("No audio device available")]
    NoDevice,

    #[error("Audio session is not active")]
    Inactive,

    #[error("Hardware refused the request: {0}")]
    Rejected(String),

    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// What the session asks the hardware for
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareRequest {
    pub category: SessionCategory,
    /// Preferred IO buffer duration in milliseconds
    pub buffer_duration_ms: f64,
    /// Preferred minimum sample rate in Hz
    pub min_sample_rate: u32,
    /// Channels in the processing callback
    pub channels: u16,
}

/// What the hardware actually granted. May differ from the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrantedFormat {
    pub sample_rate: f64,
    pub buffer_duration_ms: f64,
    pub output_channels: u16,
    pub input_channels: u16,
}

/// Asynchronous lifecycle notifications from the platform audio service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    InterruptionBegan,
    /// `should_resume` is false when the interrupting party asks us to stay quiet
    InterruptionEnded { should_resume: bool },
    RouteChanged,
    /// The platform media server restarted; all hardware state is lost
    HardwareReset,
}

/// Capability interface over the platform audio service.
///
/// All methods are called from the control domain. The gateway delivers ticks
/// to the [`Renderer`] it was handed in [`attach_renderer`](Self::attach_renderer)
/// on its own real-time thread, only while active.
pub trait HardwareGateway {
    /// Hand over the real-time bridge. Called once, before the first activation.
    fn attach_renderer(&mut self, renderer: Renderer);

    /// Activate the hardware session and start delivering ticks
    fn activate(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError>;

    /// Stop ticks and release the hardware session. Best effort.
    fn deactivate(&mut self);

    /// Ask an active session for new parameters (buffer size change, route change)
    fn reconfigure(&mut self, request: &HardwareRequest) -> Result<GrantedFormat, GatewayError>;

    /// The format the hardware is currently running at
    fn current_format(&self) -> Result<GrantedFormat, GatewayError>;

    /// Next pending notification, in arrival order
    fn poll_notification(&mut self) -> Option<Notification>;
}
