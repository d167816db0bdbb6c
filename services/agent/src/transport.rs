use anyhow::{Context, Result};
use async_trait::async_trait;
use convai_client::ConvaiConnection;
use convai_client::types::{
    ConversationInitiation, DEFAULT_PCM_SAMPLE_RATE, InitiationMetadata, ServerEvent, pcm_sample_rate,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use voice_core::{ConnectionMode, SessionHandle, SessionTransport, TransportError, TransportEvent};

/// How long the server gets to answer the initiation with its metadata.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 256;

/// One chunk of agent speech for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAudio {
    pub sample_rate: u32,
    pub base64_pcm16: String,
}

/// Opens new connections to the conversation endpoint.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, agent_id: &str) -> Result<Box<dyn ConvaiConnection>>;
}

/// Dials the real websocket endpoint.
pub struct WsDialer {
    base_url: Option<String>,
    api_key: Option<SecretString>,
}

impl WsDialer {
    pub fn new(base_url: Option<String>, api_key: Option<SecretString>) -> Self {
        Self { base_url, api_key }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, agent_id: &str) -> Result<Box<dyn ConvaiConnection>> {
        let mut builder = convai_client::Config::builder(agent_id);
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(api_key) = &self.api_key {
            builder = builder.with_api_key(api_key.expose_secret());
        }
        let client = convai_client::connect_with_config(convai_client::DEFAULT_CAPACITY, builder.build())
            .await
            .context("Failed to connect to the conversation endpoint")?;
        Ok(Box::new(client))
    }
}

/// Translates a server event into what the session controller cares about.
///
/// Agent and user utterances are messages; pings, audio and scoring events
/// are handled inside the session task and yield nothing.
pub fn map_server_event(event: &ServerEvent) -> Option<TransportEvent> {
    match event {
        ServerEvent::AgentResponse { agent_response_event } => {
            Some(TransportEvent::Message(agent_response_event.text().to_string()))
        }
        ServerEvent::AgentResponseCorrection {
            agent_response_correction_event,
        } => Some(TransportEvent::Message(
            agent_response_correction_event.corrected().to_string(),
        )),
        ServerEvent::UserTranscript {
            user_transcription_event,
        } => Some(TransportEvent::Message(user_transcription_event.text().to_string())),
        ServerEvent::Error(e) => Some(TransportEvent::Error(match e.code() {
            Some(code) => format!("{}: {}", code, e.message()),
            None => e.message().to_string(),
        })),
        ServerEvent::Close { reason } => Some(TransportEvent::Disconnected {
            reason: reason.clone(),
        }),
        _ => None,
    }
}

struct SessionEntry {
    events: Option<mpsc::Receiver<TransportEvent>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// `SessionTransport` over the conversational-agent websocket.
///
/// Each open session gets a task that owns the connection. It answers
/// pings, forwards microphone chunks, hands agent audio to playback and
/// turns the rest into `TransportEvent`s.
pub struct ConvaiTransport<D: Dialer> {
    dialer: D,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    microphone: Option<Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>>,
    playback: Option<mpsc::Sender<AgentAudio>>,
}

impl<D: Dialer> ConvaiTransport<D> {
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            microphone: None,
            playback: None,
        }
    }

    /// Base64 PCM16 chunks to stream to the agent while a session is open.
    pub fn with_microphone(mut self, chunks: mpsc::Receiver<String>) -> Self {
        self.microphone = Some(Arc::new(tokio::sync::Mutex::new(chunks)));
        self
    }

    /// Where agent audio is sent for playback.
    pub fn with_playback(mut self, audio: mpsc::Sender<AgentAudio>) -> Self {
        self.playback = Some(audio);
        self
    }

    fn open_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Sends the initiation and waits for the conversation metadata. Events
/// that arrive before it are forwarded as usual.
async fn handshake(
    conn: &mut dyn ConvaiConnection,
    server_rx: &mut convai_client::ServerRx,
    events_tx: &mpsc::Sender<TransportEvent>,
    user_id: &str,
) -> Result<InitiationMetadata, TransportError> {
    conn.initiate(ConversationInitiation::new().with_user_id(user_id))
        .await
        .map_err(|e| TransportError::Open(format!("{e:#}")))?;

    let wait = async {
        loop {
            match server_rx.recv().await {
                Ok(ServerEvent::ConversationInitiationMetadata {
                    conversation_initiation_metadata_event: meta,
                }) => return Ok(meta),
                Ok(ServerEvent::Close { reason }) => {
                    return Err(TransportError::Open(format!(
                        "connection closed during handshake: {}",
                        reason.unwrap_or_else(|| "no reason given".to_string())
                    )));
                }
                Ok(event) => {
                    if let Some(mapped) = map_server_event(&event) {
                        let _ = events_tx.try_send(mapped);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("handshake lagged behind by {} events", n);
                }
                Err(RecvError::Closed) => {
                    return Err(TransportError::Open("connection closed during handshake".to_string()));
                }
            }
        }
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, wait)
        .await
        .map_err(|_| TransportError::Open("timed out waiting for conversation metadata".to_string()))?
}

async fn next_chunk(microphone: &mut Option<tokio::sync::MutexGuard<'_, mpsc::Receiver<String>>>) -> Option<String> {
    match microphone {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn next_pong_at(pongs: &[(Instant, u64)]) -> Instant {
    pongs
        .iter()
        .map(|(due, _)| *due)
        .min()
        .unwrap_or_else(|| Instant::now() + HANDSHAKE_TIMEOUT)
}

/// Where a session's agent audio goes: the playback sink plus the rate of
/// the agent's PCM, or nowhere.
struct PlaybackRoute {
    sink: mpsc::Sender<AgentAudio>,
    sample_rate: u32,
}

/// Owns one connection until shutdown or until the server goes away.
async fn run_session(
    id: u64,
    mut conn: Box<dyn ConvaiConnection>,
    mut server_rx: convai_client::ServerRx,
    events_tx: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
    microphone: Option<Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>>,
    playback: Option<PlaybackRoute>,
) {
    // Pongs waiting for the delay the server asked for.
    let mut pongs: Vec<(Instant, u64)> = Vec::new();
    let mut mic = match &microphone {
        Some(shared) => {
            let mut guard = shared.lock().await;
            // Drop audio captured while no session was listening.
            while guard.try_recv().is_ok() {}
            Some(guard)
        }
        None => None,
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!(session = id, "session shutdown requested");
                break;
            }
            chunk = next_chunk(&mut mic) => match chunk {
                Some(chunk) => {
                    if let Err(e) = conn.send_user_audio(chunk).await {
                        tracing::warn!(session = id, "failed to send microphone audio: {:#}", e);
                    }
                }
                None => {
                    tracing::info!(session = id, "microphone stream ended");
                    mic = None;
                }
            },
            _ = tokio::time::sleep_until(next_pong_at(&pongs)), if !pongs.is_empty() => {
                let now = Instant::now();
                let (due, waiting): (Vec<_>, Vec<_>) = pongs.drain(..).partition(|(at, _)| *at <= now);
                pongs = waiting;
                for (_, event_id) in due {
                    if let Err(e) = conn.pong(event_id).await {
                        tracing::warn!(session = id, "failed to answer ping: {:#}", e);
                    }
                }
            }
            event = server_rx.recv() => match event {
                Ok(ServerEvent::Ping { ping_event }) => match ping_event.ping_ms() {
                    Some(delay) if delay > 0 => {
                        pongs.push((Instant::now() + Duration::from_millis(delay), ping_event.event_id()));
                    }
                    _ => {
                        if let Err(e) = conn.pong(ping_event.event_id()).await {
                            tracing::warn!(session = id, "failed to answer ping: {:#}", e);
                        }
                    }
                },
                Ok(ServerEvent::Audio { audio_event }) => {
                    if let Some(route) = &playback {
                        let chunk = AgentAudio {
                            sample_rate: route.sample_rate,
                            base64_pcm16: audio_event.audio().to_string(),
                        };
                        if let Err(e) = route.sink.try_send(chunk) {
                            tracing::warn!(session = id, "dropping agent audio: {}", e);
                        }
                    }
                }
                Ok(ServerEvent::Interruption { .. }) => {
                    tracing::debug!(session = id, "agent interrupted");
                }
                Ok(event) => {
                    let closing = matches!(event, ServerEvent::Close { .. });
                    if let Some(mapped) = map_server_event(&event) {
                        if let Err(e) = events_tx.try_send(mapped) {
                            tracing::warn!(session = id, "dropping session event: {}", e);
                        }
                    }
                    if closing {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(session = id, "lagged behind by {} server events", n);
                }
                Err(RecvError::Closed) => {
                    let _ = events_tx.try_send(TransportEvent::Disconnected { reason: None });
                    break;
                }
            },
        }
    }

    conn.close();
    match conn.stats() {
        Ok(stats) => tracing::info!(
            session = id,
            received = stats.messages_received(),
            audio_in = stats.audio_chunks_received(),
            audio_out = stats.audio_chunks_sent(),
            pings = stats.pings_answered(),
            "session ended"
        ),
        Err(e) => tracing::warn!(session = id, "no stats for session: {:#}", e),
    }
}

#[async_trait]
impl<D: Dialer> SessionTransport for ConvaiTransport<D> {
    async fn open_session(
        &self,
        agent_id: &str,
        mode: ConnectionMode,
        user_id: &str,
    ) -> Result<SessionHandle, TransportError> {
        if mode != ConnectionMode::WebSocket {
            return Err(TransportError::UnsupportedMode(mode));
        }

        let mut conn = self
            .dialer
            .dial(agent_id)
            .await
            .map_err(|e| TransportError::Open(format!("{e:#}")))?;
        let mut server_rx = conn
            .server_events()
            .map_err(|e| TransportError::Open(format!("{e:#}")))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let metadata = match handshake(conn.as_mut(), &mut server_rx, &events_tx, user_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                conn.close();
                return Err(e);
            }
        };
        let conversation_id = metadata.conversation_id();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session = id, conversation_id = %conversation_id, "session opened");

        if let Some(format) = metadata.user_input_audio_format() {
            if pcm_sample_rate(format) != Some(DEFAULT_PCM_SAMPLE_RATE) {
                tracing::warn!(session = id, "agent expects {} input; microphone audio is sent as pcm_16000", format);
            }
        }
        let playback = match (&self.playback, metadata.agent_output_pcm_rate()) {
            (Some(sink), Some(sample_rate)) => Some(PlaybackRoute {
                sink: sink.clone(),
                sample_rate,
            }),
            (Some(_), None) => {
                tracing::warn!(
                    session = id,
                    format = ?metadata.agent_output_audio_format(),
                    "agent audio is not PCM; playback disabled for this session"
                );
                None
            }
            (None, _) => None,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(
            id,
            conn,
            server_rx,
            events_tx,
            shutdown_rx,
            self.microphone.clone(),
            playback,
        ));

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| TransportError::Open("session table poisoned".to_string()))?;
        sessions.insert(
            id,
            SessionEntry {
                events: Some(events_rx),
                shutdown: shutdown_tx,
                task,
            },
        );
        Ok(SessionHandle::new(id).with_conversation_id(conversation_id))
    }

    async fn close_session(&self, handle: SessionHandle) {
        let entry = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&handle.id()),
            Err(_) => {
                tracing::error!("session table poisoned");
                None
            }
        };
        let Some(entry) = entry else {
            tracing::debug!(session = handle.id(), "close for unknown session ignored");
            return;
        };
        // The task may already have ended on its own.
        let _ = entry.shutdown.send(());
        if let Err(e) = entry.task.await {
            tracing::error!(session = handle.id(), "session task failed: {}", e);
        }
        tracing::info!(session = handle.id(), open = self.open_count(), "session closed");
    }

    async fn messages(
        &self,
        handle: &SessionHandle,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| TransportError::Subscribe("session table poisoned".to_string()))?;
        let entry = sessions
            .get_mut(&handle.id())
            .ok_or_else(|| TransportError::Subscribe(format!("unknown session {}", handle.id())))?;
        entry
            .events
            .take()
            .ok_or_else(|| TransportError::Subscribe("event stream already taken".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convai_client::types::ConversationInitiation;
    use convai_client::{ServerRx, Stats};
    use mockall::mock;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast;

    mock! {
        pub Connection {}
        #[async_trait]
        impl ConvaiConnection for Connection {
            fn server_events(&self) -> Result<ServerRx>;
            fn stats(&self) -> Result<Stats>;
            async fn initiate(&mut self, initiation: ConversationInitiation) -> Result<()>;
            async fn send_user_audio(&mut self, base64_pcm16: String) -> Result<()>;
            async fn pong(&mut self, event_id: u64) -> Result<()>;
            fn close(&mut self);
        }
    }

    /// Hands out pre-built connections in order.
    struct ScriptedDialer {
        connections: Mutex<Vec<MockConnection>>,
    }

    impl ScriptedDialer {
        fn new(connections: Vec<MockConnection>) -> Self {
            Self {
                connections: Mutex::new(connections),
            }
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, _agent_id: &str) -> Result<Box<dyn ConvaiConnection>> {
            let mut connections = self.connections.lock().unwrap();
            if connections.is_empty() {
                anyhow::bail!("connection refused");
            }
            Ok(Box::new(connections.remove(0)))
        }
    }

    fn event(value: serde_json::Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    fn metadata() -> ServerEvent {
        metadata_with_output(None)
    }

    fn metadata_with_output(format: Option<&str>) -> ServerEvent {
        event(serde_json::json!({
            "type": "conversation_initiation_metadata",
            "conversation_initiation_metadata_event": {
                "conversation_id": "conv_42",
                "agent_output_audio_format": format
            }
        }))
    }

    fn agent_says(text: &str) -> ServerEvent {
        event(serde_json::json!({
            "type": "agent_response",
            "agent_response_event": { "agent_response": text }
        }))
    }

    fn ping(event_id: u64, ping_ms: u64) -> ServerEvent {
        event(serde_json::json!({
            "type": "ping",
            "ping_event": { "event_id": event_id, "ping_ms": ping_ms }
        }))
    }

    fn agent_audio() -> ServerEvent {
        event(serde_json::json!({
            "type": "audio",
            "audio_event": { "audio_base_64": "AAAA", "event_id": 1 }
        }))
    }

    /// A connection that completes the handshake and may be closed once.
    fn connected(server: &broadcast::Sender<ServerEvent>) -> MockConnection {
        connected_with(server, metadata())
    }

    fn connected_with(server: &broadcast::Sender<ServerEvent>, meta: ServerEvent) -> MockConnection {
        let mut conn = MockConnection::new();
        let rx_source = server.clone();
        conn.expect_server_events()
            .times(1)
            .returning(move || Ok(rx_source.subscribe()));
        let meta_source = server.clone();
        conn.expect_initiate()
            .withf(|initiation| initiation.user_id() == Some("user1"))
            .times(1)
            .returning(move |_| {
                let _ = meta_source.send(meta.clone());
                Ok(())
            });
        conn.expect_close().times(1).return_const(());
        conn.expect_stats().returning(|| Ok(Stats::default()));
        conn
    }

    #[test]
    fn maps_utterances_errors_and_close() {
        let response = event(serde_json::json!({
            "type": "agent_response",
            "agent_response_event": { "agent_response": "Hello!" }
        }));
        assert_eq!(
            map_server_event(&response),
            Some(TransportEvent::Message("Hello!".to_string()))
        );

        let transcript = event(serde_json::json!({
            "type": "user_transcript",
            "user_transcription_event": { "user_transcript": "hi" }
        }));
        assert_eq!(
            map_server_event(&transcript),
            Some(TransportEvent::Message("hi".to_string()))
        );

        let error = event(serde_json::json!({ "type": "error", "message": "quota exceeded" }));
        assert_eq!(
            map_server_event(&error),
            Some(TransportEvent::Error("quota exceeded".to_string()))
        );

        let close = ServerEvent::Close {
            reason: Some("bye".to_string()),
        };
        assert_eq!(
            map_server_event(&close),
            Some(TransportEvent::Disconnected {
                reason: Some("bye".to_string())
            })
        );

        let vad = event(serde_json::json!({
            "type": "vad_score",
            "vad_score_event": { "vad_score": 0.9 }
        }));
        assert_eq!(map_server_event(&vad), None);
    }

    #[tokio::test]
    async fn webrtc_mode_is_rejected_without_dialing() {
        let transport = ConvaiTransport::new(ScriptedDialer::new(Vec::new()));
        let err = transport
            .open_session("agent", ConnectionMode::WebRtc, "user1")
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::UnsupportedMode(ConnectionMode::WebRtc));
    }

    #[tokio::test]
    async fn dial_failure_is_an_open_error() {
        let transport = ConvaiTransport::new(ScriptedDialer::new(Vec::new()));
        let err = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Open(ref msg) if msg.contains("connection refused")));
    }

    #[tokio::test]
    async fn open_forwards_messages_and_answers_pings() {
        let (server, _keep) = broadcast::channel(16);
        let mut conn = connected(&server);
        conn.expect_pong()
            .withf(|id| *id == 7)
            .times(1)
            .returning(|_| Ok(()));
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn]));

        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();
        assert_eq!(handle.conversation_id(), Some("conv_42"));

        let mut events = transport.messages(&handle).await.unwrap();
        assert!(matches!(
            transport.messages(&handle).await,
            Err(TransportError::Subscribe(_))
        ));

        server
            .send(event(serde_json::json!({ "type": "ping", "ping_event": { "event_id": 7 } })))
            .unwrap();
        server
            .send(event(serde_json::json!({
                "type": "agent_response",
                "agent_response_event": { "agent_response": "How can I help?" }
            })))
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("How can I help?".to_string()))
        );

        transport.close_session(handle.clone()).await;
        // The session task is gone, so the stream ends.
        assert_eq!(events.recv().await, None);
        // Closing again is a no-op.
        transport.close_session(handle).await;
    }

    #[tokio::test]
    async fn server_close_becomes_disconnect() {
        let (server, _keep) = broadcast::channel(16);
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![connected(&server)]));
        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();
        let mut events = transport.messages(&handle).await.unwrap();

        server
            .send(ServerEvent::Close {
                reason: Some("agent ended call".to_string()),
            })
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Disconnected {
                reason: Some("agent ended call".to_string())
            })
        );
        transport.close_session(handle).await;
    }

    #[tokio::test]
    async fn close_during_handshake_fails_open() {
        let (server, _keep) = broadcast::channel(16);
        let mut conn = MockConnection::new();
        let rx_source = server.clone();
        conn.expect_server_events()
            .returning(move || Ok(rx_source.subscribe()));
        let close_source = server.clone();
        conn.expect_initiate().returning(move |_| {
            let _ = close_source.send(ServerEvent::Close {
                reason: Some("invalid agent".to_string()),
            });
            Ok(())
        });
        conn.expect_close().times(1).return_const(());
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn]));

        let err = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Open(ref msg) if msg.contains("invalid agent")));
    }

    #[tokio::test]
    async fn microphone_chunks_are_streamed_and_agent_audio_played() {
        let (server, _keep) = broadcast::channel(16);
        let mut conn = connected(&server);
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        conn.expect_send_user_audio().returning(move |chunk| {
            let _ = sent_tx.send(chunk);
            Ok(())
        });
        let (mic_tx, mic_rx) = mpsc::channel(8);
        let (play_tx, mut play_rx) = mpsc::channel(8);
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn]))
            .with_microphone(mic_rx)
            .with_playback(play_tx);

        // Captured before any session exists; flushed at session start.
        mic_tx.send("stale".to_string()).await.unwrap();

        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();

        server
            .send(event(serde_json::json!({
                "type": "audio",
                "audio_event": { "audio_base_64": "AAAA", "event_id": 1 }
            })))
            .unwrap();
        assert_eq!(
            play_rx.recv().await,
            Some(AgentAudio {
                sample_rate: 16000,
                base64_pcm16: "AAAA".to_string()
            })
        );

        mic_tx.send("fresh".to_string()).await.unwrap();
        assert_eq!(sent_rx.recv().await.as_deref(), Some("fresh"));

        transport.close_session(handle).await;
        assert!(sent_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn agent_audio_carries_the_session_output_rate() {
        let (server, _keep) = broadcast::channel(16);
        let conn = connected_with(&server, metadata_with_output(Some("pcm_24000")));
        let (play_tx, mut play_rx) = mpsc::channel(8);
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn])).with_playback(play_tx);
        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();

        server.send(agent_audio()).unwrap();
        let chunk = play_rx.recv().await.unwrap();
        assert_eq!(chunk.sample_rate, 24000);

        transport.close_session(handle).await;
    }

    #[tokio::test]
    async fn non_pcm_agent_audio_is_not_played() {
        let (server, _keep) = broadcast::channel(16);
        let conn = connected_with(&server, metadata_with_output(Some("ulaw_8000")));
        let (play_tx, mut play_rx) = mpsc::channel(8);
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn])).with_playback(play_tx);
        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();
        let mut events = transport.messages(&handle).await.unwrap();

        server.send(agent_audio()).unwrap();
        server.send(agent_says("hello")).unwrap();
        // Events are handled in order, so the audio was seen first.
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("hello".to_string()))
        );
        assert!(play_rx.try_recv().is_err());

        transport.close_session(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_pong_does_not_hold_up_the_session() {
        let (server, _keep) = broadcast::channel(16);
        let mut conn = connected(&server);
        let pongs = Arc::new(AtomicUsize::new(0));
        let counted = pongs.clone();
        conn.expect_pong()
            .withf(|id| *id == 3)
            .times(1)
            .returning(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn]));
        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();
        let mut events = transport.messages(&handle).await.unwrap();

        server.send(ping(3, 250)).unwrap();
        server.send(agent_says("still talking")).unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("still talking".to_string()))
        );
        assert_eq!(pongs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pongs.load(Ordering::SeqCst), 1);

        transport.close_session(handle).await;
    }

    #[tokio::test]
    async fn close_is_not_blocked_by_a_pending_pong() {
        let (server, _keep) = broadcast::channel(16);
        let mut conn = connected(&server);
        conn.expect_pong().never();
        let transport = ConvaiTransport::new(ScriptedDialer::new(vec![conn]));
        let handle = transport
            .open_session("agent", ConnectionMode::WebSocket, "user1")
            .await
            .unwrap();
        let mut events = transport.messages(&handle).await.unwrap();

        server.send(ping(4, 60_000)).unwrap();
        server.send(agent_says("ok")).unwrap();
        events.recv().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), transport.close_session(handle))
            .await
            .expect("close waited on the pong delay");
    }
}
