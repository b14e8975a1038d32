use thiserror::Error;

use super::config::ConfigError;
use super::negotiator::NegotiationError;
use super::state::SessionState;
use crate::gateway::GatewayError;

/// Errors surfaced by the session manager on the control domain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Hardware activation failed: {0}")]
    Activation(#[from] GatewayError),

    #[error("Parameter negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}
