use crate::client::consts::{BASE_URL, ELEVENLABS_API_KEY};
use secrecy::SecretString;

pub struct Config {
    base_url: String,
    agent_id: String,
    api_key: Option<SecretString>,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(agent_id: &str) -> Self {
        Self {
            config: Config::new(agent_id),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = Some(SecretString::from(api_key.to_string()));
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Config {
    /// Public agents need no key; one is picked up from the environment if set.
    pub fn new(agent_id: &str) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            agent_id: agent_id.to_string(),
            api_key: std::env::var(ELEVENLABS_API_KEY)
                .ok()
                .filter(|key| !key.is_empty())
                .map(SecretString::from),
        }
    }

    pub fn builder(agent_id: &str) -> ConfigBuilder {
        ConfigBuilder::new(agent_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }
}
