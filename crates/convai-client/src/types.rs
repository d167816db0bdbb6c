//! Wire types for the conversational-agent websocket protocol.

/// Rate of the endpoint's default `pcm_16000` audio format.
pub const DEFAULT_PCM_SAMPLE_RATE: u32 = 16000;

/// Sample rate of a `pcm_<rate>` format name; `None` for other encodings
/// such as `ulaw_8000`.
pub fn pcm_sample_rate(format: &str) -> Option<u32> {
    format.strip_prefix("pcm_")?.parse().ok()
}

/// Events sent by the client.
///
/// Audio chunks are bare objects without a `type` field; everything else is
/// tagged.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum ClientEvent {
    Audio(UserAudioChunk),
    Control(ControlEvent),
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    ConversationInitiationClientData(ConversationInitiation),
    Pong { event_id: u64 },
}

/// `conversation_initiation_client_data` payload.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConversationInitiation {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl ConversationInitiation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Base64 PCM16 microphone audio.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserAudioChunk {
    user_audio_chunk: String,
}

impl UserAudioChunk {
    pub fn new(base64_pcm16: String) -> Self {
        Self {
            user_audio_chunk: base64_pcm16,
        }
    }

    pub fn audio(&self) -> &str {
        &self.user_audio_chunk
    }
}

/// Events received from the server.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Synthesised locally when the socket closes.
    Close { reason: Option<String> },
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    Audio {
        audio_event: AudioEvent,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    AgentResponseCorrection {
        agent_response_correction_event: AgentResponseCorrectionEvent,
    },
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    Interruption {
        #[serde(default)]
        interruption_event: Option<InterruptionEvent>,
    },
    Ping {
        ping_event: PingEvent,
    },
    VadScore {
        vad_score_event: VadScoreEvent,
    },
    Error(ErrorEvent),
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn is_audio(&self) -> bool {
        matches!(self, ServerEvent::Audio { .. })
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct InitiationMetadata {
    conversation_id: String,
    #[serde(default)]
    agent_output_audio_format: Option<String>,
    #[serde(default)]
    user_input_audio_format: Option<String>,
}

impl InitiationMetadata {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn agent_output_audio_format(&self) -> Option<&str> {
        self.agent_output_audio_format.as_deref()
    }

    pub fn user_input_audio_format(&self) -> Option<&str> {
        self.user_input_audio_format.as_deref()
    }

    /// Sample rate of the agent's audio when it is PCM. No format means the
    /// endpoint default.
    pub fn agent_output_pcm_rate(&self) -> Option<u32> {
        match self.agent_output_audio_format.as_deref() {
            None => Some(DEFAULT_PCM_SAMPLE_RATE),
            Some(format) => pcm_sample_rate(format),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AudioEvent {
    audio_base_64: String,
    #[serde(default)]
    event_id: Option<u64>,
}

impl AudioEvent {
    pub fn audio(&self) -> &str {
        &self.audio_base_64
    }

    pub fn event_id(&self) -> Option<u64> {
        self.event_id
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentResponseEvent {
    agent_response: String,
}

impl AgentResponseEvent {
    pub fn text(&self) -> &str {
        &self.agent_response
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentResponseCorrectionEvent {
    #[serde(default)]
    original_agent_response: String,
    corrected_agent_response: String,
}

impl AgentResponseCorrectionEvent {
    pub fn original(&self) -> &str {
        &self.original_agent_response
    }

    pub fn corrected(&self) -> &str {
        &self.corrected_agent_response
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UserTranscriptionEvent {
    user_transcript: String,
}

impl UserTranscriptionEvent {
    pub fn text(&self) -> &str {
        &self.user_transcript
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct InterruptionEvent {
    #[serde(default)]
    event_id: Option<u64>,
}

impl InterruptionEvent {
    pub fn event_id(&self) -> Option<u64> {
        self.event_id
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PingEvent {
    event_id: u64,
    #[serde(default)]
    ping_ms: Option<u64>,
}

impl PingEvent {
    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    /// Delay the server asks for before the pong, if any.
    pub fn ping_ms(&self) -> Option<u64> {
        self.ping_ms
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct VadScoreEvent {
    vad_score: f32,
}

impl VadScoreEvent {
    pub fn score(&self) -> f32 {
        self.vad_score
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default, alias = "error_type")]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorEvent {
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown error")
    }
}
