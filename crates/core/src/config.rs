use crate::generic_types::ConnectionMode;
use std::time::Duration;

/// How long the speaking flag is held after the last message.
pub const DEFAULT_SPEAKING_HOLD: Duration = Duration::from_millis(2000);
pub const DEFAULT_USER_ID: &str = "user1";
/// Capacity of the channel carrying start/stop requests to the controller.
pub const DEFAULT_COMMAND_CAPACITY: usize = 16;

/// Static settings for one controller. Fixed for the controller's lifetime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    agent_id: String,
    user_id: String,
    connection_mode: ConnectionMode,
    speaking_hold: Duration,
    command_capacity: usize,
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new(agent_id: &str) -> Self {
        Self {
            config: SessionConfig::new(agent_id),
        }
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.config.user_id = user_id.to_string();
        self
    }

    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.config.connection_mode = mode;
        self
    }

    pub fn with_speaking_hold(mut self, hold: Duration) -> Self {
        self.config.speaking_hold = hold;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        // mpsc channels panic on zero capacity.
        self.config.command_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl SessionConfig {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            connection_mode: ConnectionMode::default(),
            speaking_hold: DEFAULT_SPEAKING_HOLD,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }

    pub fn builder(agent_id: &str) -> SessionConfigBuilder {
        SessionConfigBuilder::new(agent_id)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    pub fn speaking_hold(&self) -> Duration {
        self.speaking_hold
    }

    pub fn command_capacity(&self) -> usize {
        self.command_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_front_end() {
        let config = SessionConfig::new("agent-1");
        assert_eq!(config.agent_id(), "agent-1");
        assert_eq!(config.user_id(), "user1");
        assert_eq!(config.connection_mode(), ConnectionMode::WebRtc);
        assert_eq!(config.speaking_hold(), Duration::from_millis(2000));
    }

    #[test]
    fn builder_overrides_and_clamps_capacity() {
        let config = SessionConfig::builder("agent-1")
            .with_user_id("kiosk-7")
            .with_connection_mode(ConnectionMode::WebSocket)
            .with_speaking_hold(Duration::from_millis(750))
            .with_command_capacity(0)
            .build();

        assert_eq!(config.user_id(), "kiosk-7");
        assert_eq!(config.connection_mode(), ConnectionMode::WebSocket);
        assert_eq!(config.speaking_hold(), Duration::from_millis(750));
        assert_eq!(config.command_capacity(), 1);
    }
}
