//! Service configuration.
//!
//! Settings come from environment variables, with a `.env` file in the
//! working directory picked up for local development.

use secrecy::SecretString;
use std::time::Duration;
use voice_core::ConnectionMode;
use voice_core::config::{DEFAULT_SPEAKING_HOLD, DEFAULT_USER_ID};

#[derive(Debug, Clone)]
pub struct Config {
    pub agent_id: String,
    pub user_id: String,
    pub connection_mode: ConnectionMode,
    pub speaking_hold: Duration,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub log_filter: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    // *   `AGENT_ID`: identifier of the conversational agent. Required.
    // *   `AGENT_USER_ID`: (Optional) user id sent with the session. Defaults to "user1".
    // *   `CONNECTION_MODE`: (Optional) "websocket" or "webrtc". Defaults to "websocket".
    // *   `SPEAKING_HOLD_MS`: (Optional) how long the speaking flag outlives a message. Defaults to 2000.
    // *   `CONVAI_BASE_URL`: (Optional) override for the conversation endpoint.
    // *   `ELEVENLABS_API_KEY`: (Optional) key for private agents.
    // *   `RUST_LOG`: (Optional) tracing filter. Defaults to "info".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup. Empty values count
    /// as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let agent_id = var("AGENT_ID").ok_or_else(|| ConfigError::MissingVar("AGENT_ID".to_string()))?;
        let user_id = var("AGENT_USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string());

        let connection_mode = match var("CONNECTION_MODE") {
            None => ConnectionMode::WebSocket,
            Some(mode) => match mode.to_lowercase().as_str() {
                "websocket" => ConnectionMode::WebSocket,
                "webrtc" => ConnectionMode::WebRtc,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "CONNECTION_MODE".to_string(),
                        value: mode,
                    });
                }
            },
        };

        let speaking_hold = match var("SPEAKING_HOLD_MS") {
            None => DEFAULT_SPEAKING_HOLD,
            Some(ms) => ms
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue {
                    name: "SPEAKING_HOLD_MS".to_string(),
                    value: ms,
                })?,
        };

        Ok(Self {
            agent_id,
            user_id,
            connection_mode,
            speaking_hold,
            base_url: var("CONVAI_BASE_URL"),
            api_key: var("ELEVENLABS_API_KEY").map(SecretString::from),
            log_filter: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn session_config(&self) -> voice_core::SessionConfig {
        voice_core::SessionConfig::builder(&self.agent_id)
            .with_user_id(&self.user_id)
            .with_connection_mode(self.connection_mode)
            .with_speaking_hold(self.speaking_hold)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn agent_id_is_required() {
        let err = Config::from_vars(vars(&[("AGENT_ID", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("AGENT_ID".to_string()));
    }

    #[test]
    fn defaults_apply_when_only_agent_is_set() {
        let config = Config::from_vars(vars(&[("AGENT_ID", "agent_123")])).unwrap();
        assert_eq!(config.agent_id, "agent_123");
        assert_eq!(config.user_id, "user1");
        assert_eq!(config.connection_mode, ConnectionMode::WebSocket);
        assert_eq!(config.speaking_hold, Duration::from_millis(2000));
        assert!(config.base_url.is_none());
        assert!(config.api_key.is_none());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_vars(vars(&[
            ("AGENT_ID", "agent_123"),
            ("AGENT_USER_ID", "kiosk"),
            ("CONNECTION_MODE", "WebRTC"),
            ("SPEAKING_HOLD_MS", "500"),
            ("CONVAI_BASE_URL", "ws://localhost:9000/v1/convai"),
        ]))
        .unwrap();
        assert_eq!(config.connection_mode, ConnectionMode::WebRtc);
        assert_eq!(config.speaking_hold, Duration::from_millis(500));

        let session = config.session_config();
        assert_eq!(session.agent_id(), "agent_123");
        assert_eq!(session.user_id(), "kiosk");
        assert_eq!(session.speaking_hold(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_vars(vars(&[("AGENT_ID", "a"), ("CONNECTION_MODE", "carrier-pigeon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "CONNECTION_MODE"));

        let err = Config::from_vars(vars(&[("AGENT_ID", "a"), ("SPEAKING_HOLD_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "SPEAKING_HOLD_MS"));
    }
}
