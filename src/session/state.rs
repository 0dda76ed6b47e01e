//! Session state machine

use crate::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for StartupMessage (SSLRequest / GSSENCRequest keep this state)
    AwaitingStartup,

    /// Startup accepted, credential exchange in progress
    Authenticating,

    /// ReadyForQuery sent, waiting for the next command
    Idle,

    /// Query in progress
    Executing,

    /// Terminated normally (Terminate message or end of stream)
    Closed,

    /// Aborted by a protocol violation, authentication failure or I/O error
    Failed,
}

impl SessionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (AwaitingStartup, Authenticating)
                | (Authenticating, Idle)
                | (Idle, Executing)
                | (Executing, Idle)
                | (AwaitingStartup | Authenticating | Idle | Executing, Closed)
                | (AwaitingStartup | Authenticating | Idle | Executing, Failed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the session has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingStartup => write!(f, "awaiting_startup"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Idle => write!(f, "idle"),
            Self::Executing => write!(f, "executing"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
