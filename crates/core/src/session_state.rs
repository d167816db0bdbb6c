use crate::error::SessionError;
use std::fmt;

/// Lifecycle stage of the voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Permission was granted and the transport is being opened.
    Connecting,
    Active,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Connecting => f.write_str("connecting"),
            Phase::Active => f.write_str("active"),
        }
    }
}

/// Snapshot of the session as seen by the display surface.
///
/// Only the controller mutates this record, and only through the methods
/// below, which keep `is_speaking` false outside `Phase::Active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    phase: Phase,
    is_speaking: bool,
    agent_id: String,
    last_error: Option<SessionError>,
}

impl SessionState {
    pub fn new(agent_id: &str) -> Self {
        Self {
            phase: Phase::Idle,
            is_speaking: false,
            agent_id: agent_id.to_string(),
            last_error: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    // The mutators return whether anything changed so the controller can
    // skip notifying observers on no-op updates.

    pub(crate) fn begin_attempt(&mut self) -> bool {
        let changed = self.last_error.is_some();
        self.last_error = None;
        changed
    }

    pub(crate) fn connecting(&mut self) -> bool {
        self.transition(Phase::Connecting)
    }

    pub(crate) fn activate(&mut self) -> bool {
        self.transition(Phase::Active)
    }

    pub(crate) fn set_speaking(&mut self, speaking: bool) -> bool {
        let speaking = speaking && self.phase == Phase::Active;
        if self.is_speaking == speaking {
            return false;
        }
        self.is_speaking = speaking;
        true
    }

    /// Back to `Idle`, recording `error` if there was one.
    pub(crate) fn reset(&mut self, error: Option<SessionError>) -> bool {
        let changed = self.phase != Phase::Idle || self.is_speaking || self.last_error != error;
        self.phase = Phase::Idle;
        self.is_speaking = false;
        self.last_error = error;
        changed
    }

    fn transition(&mut self, phase: Phase) -> bool {
        if self.phase == phase {
            return false;
        }
        self.phase = phase;
        if phase != Phase::Active {
            self.is_speaking = false;
        }
        true
    }
}
