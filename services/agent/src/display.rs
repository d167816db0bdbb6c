//! Terminal rendering of the session state.

use voice_core::{Phase, SessionError, SessionState};

pub const START_PROMPT: &str = "Start Conversation";
pub const CONNECTING: &str = "Connecting...";
pub const LISTENING: &str = "Listening...";
pub const SPEAKING: &str = "Speaking...";

/// One status line for the current state.
pub fn render(state: &SessionState) -> String {
    status_line(state.phase(), state.is_speaking(), state.last_error())
}

pub fn status_line(phase: Phase, is_speaking: bool, last_error: Option<&SessionError>) -> String {
    let status = match (phase, is_speaking) {
        (Phase::Idle, _) => format!("[{}] (type 'start')", START_PROMPT),
        (Phase::Connecting, _) => CONNECTING.to_string(),
        (Phase::Active, false) => format!("{} (type 'stop' to end)", LISTENING),
        (Phase::Active, true) => format!("{} (type 'stop' to end)", SPEAKING),
    };
    match last_error {
        Some(error) if error.is_user_visible() => format!("{} | error: {}", status, error),
        _ => status,
    }
}
