pub const ELEVENLABS_API_KEY: &str = "ELEVENLABS_API_KEY";

pub const BASE_URL: &str = "wss://api.elevenlabs.io/v1/convai";
pub const CONVERSATION_PATH: &str = "conversation";

pub const API_KEY_HEADER: &str = "xi-api-key";

/// Channel capacity used by `connect`.
pub const DEFAULT_CAPACITY: usize = 1024;
