//! audio-session - audio hardware session manager
//!
//! Owns the lifecycle of a platform audio session: activation, parameter
//! negotiation, interruptions and route changes on the control thread, and a
//! glitch-free real-time bridge to the consumer's processing callback.
//!
//! ```no_run
//! use audio_session::gateway::CpalGateway;
//! use audio_session::session::{BufferView, SessionConfig, SessionDelegate, SessionManager};
//!
//! struct Host;
//!
//! impl SessionDelegate for Host {
//!     fn interruption_started(&mut self) {}
//!     fn interruption_ended(&mut self) {}
//! }
//!
//! let mut session = SessionManager::new(
//!     SessionConfig::default(),
//!     CpalGateway::new(None),
//!     Host,
//!     |buffers: &mut BufferView<'_>| {
//!         for channel in buffers.channels_mut() {
//!             channel.fill(0.0);
//!         }
//!         false
//!     },
//! )
//! .unwrap();
//!
//! session.start().unwrap();
//! loop {
//!     session.pump();
//!     std::thread::sleep(std::time::Duration::from_millis(20));
//! }
//! ```

pub mod gateway;
pub mod session;
pub mod settings;

pub use gateway::{GatewayError, GrantedFormat, HardwareGateway, HardwareRequest, Notification};
pub use session::{
    AudioProcessor, BufferView, NegotiatedParameters, SessionCategory, SessionConfig,
    SessionDelegate, SessionError, SessionManager, SessionState,
};
