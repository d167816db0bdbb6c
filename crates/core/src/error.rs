use crate::generic_types::ConnectionMode;
use crate::session_state::Phase;

/// Why microphone capture could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("microphone access was denied")]
    Denied,
    #[error("microphone is unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a `SessionTransport`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open session: {0}")]
    Open(String),
    #[error("failed to subscribe to session messages: {0}")]
    Subscribe(String),
    #[error("connection mode '{0}' is not supported by this transport")]
    UnsupportedMode(ConnectionMode),
    #[error("session disconnected{}", reason_suffix(.reason))]
    Disconnected { reason: Option<String> },
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

/// Errors surfaced by the session controller.
///
/// None of these are fatal: every path that produces one leaves the
/// controller in `Phase::Idle`, ready for another `start()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot start a session while {0}")]
    InvalidState(Phase),
    #[error("start was cancelled by a stop request")]
    Cancelled,
    #[error("session controller is no longer running")]
    ControllerClosed,
}

impl SessionError {
    /// True for the errors worth showing to the user as a failed attempt.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, SessionError::Permission(_) | SessionError::Transport(_))
    }
}
