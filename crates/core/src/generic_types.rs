use std::fmt;

/// How the transport should carry audio between the client and the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Peer-to-peer, low-latency audio.
    #[default]
    WebRtc,
    /// Audio frames multiplexed over a single websocket.
    WebSocket,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::WebRtc => f.write_str("webrtc"),
            ConnectionMode::WebSocket => f.write_str("websocket"),
        }
    }
}

/// Opaque reference to one open transport session.
///
/// Handles are issued by a `SessionTransport` and only mean something to the
/// transport that issued them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u64,
    conversation_id: Option<String>,
}

impl SessionHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            conversation_id: None,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }
}

/// Events a transport delivers for an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message occurred. The payload is not interpreted by the core.
    Message(String),
    /// A non-fatal error reported by the remote side.
    Error(String),
    /// The session is gone and will deliver nothing further.
    Disconnected { reason: Option<String> },
}
