//! Session state machine types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// State of a single device session.
///
/// Closed → Opening → Open → ConfiguringSession → Previewing ⇄ Recording;
/// any non-terminal state can drop to Error, then either Reconnecting
/// (retryable, bounded attempts) or GivenUp. `close()` is valid from any
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    ConfiguringSession,
    Previewing,
    Recording,
    Reconnecting,
    Error,
    GivenUp,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Closed
    }
}

impl SessionState {
    /// States in which the device handle is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Open
                | SessionState::ConfiguringSession
                | SessionState::Previewing
                | SessionState::Recording
        )
    }
}

/// Reconnection policy for a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay between reconnect attempts.
    pub delay: Duration,

    /// Attempts before the session gives up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            max_attempts: 30,
        }
    }
}
