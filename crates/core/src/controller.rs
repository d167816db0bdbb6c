use crate::config::SessionConfig;
use crate::error::{PermissionError, SessionError, TransportError};
use crate::generic_types::{ConnectionMode, SessionHandle, TransportEvent};
use crate::permission::{MediaPermissionProvider, PermissionDecision};
use crate::session_state::{Phase, SessionState};
use crate::speaking::SpeakingInferrer;
use crate::transport::SessionTransport;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

type StartReply = oneshot::Sender<Result<(), SessionError>>;

/// Requests from controller handles to the driver task.
enum Control {
    Start(StartReply),
    Stop(oneshot::Sender<()>),
}

/// Cheap, cloneable handle to a running session controller.
///
/// All state lives in a single driver task. Handles only send requests and
/// read snapshots, so the display surface can never mutate session state.
/// When the last handle is dropped the driver closes any open session and
/// exits.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Control>,
    state: watch::Receiver<SessionState>,
}

impl SessionController {
    /// Spawns the driver task on the current tokio runtime.
    pub fn spawn<P, T>(config: SessionConfig, permission: P, transport: T) -> (Self, JoinHandle<()>)
    where
        P: MediaPermissionProvider + 'static,
        T: SessionTransport + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity());
        let (state_tx, state_rx) = watch::channel(SessionState::new(config.agent_id()));

        let driver = SessionDriver {
            inferrer: SpeakingInferrer::new(config.speaking_hold()),
            config,
            permission: Arc::new(permission),
            transport: Arc::new(transport),
            commands: commands_rx,
            state: state_tx,
            pending: None,
            queued: None,
            active: None,
        };
        let task = tokio::spawn(driver.run());

        (
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            task,
        )
    }

    /// Asks for the microphone, then opens a session with the agent.
    ///
    /// Resolves once the attempt settles. A `stop()` issued in the meantime
    /// makes this return `SessionError::Cancelled`.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Control::Start(reply_tx))
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        reply_rx.await.map_err(|_| SessionError::ControllerClosed)?
    }

    /// Closes the session, if any, and returns to idle. Safe to call at any time.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Control::Stop(reply_tx)).await.is_err() {
            tracing::debug!("stop requested after the controller shut down");
            return;
        }
        let _ = reply_rx.await;
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

struct OpenedSession {
    handle: SessionHandle,
    events: mpsc::Receiver<TransportEvent>,
}

enum StartStage {
    Permission(BoxFuture<'static, PermissionDecision>),
    Opening(BoxFuture<'static, Result<OpenedSession, TransportError>>),
}

enum StageOutcome {
    Permission(PermissionDecision),
    Opening(Result<OpenedSession, TransportError>),
}

/// The one start attempt allowed in flight.
struct PendingStart {
    stage: StartStage,
    reply: StartReply,
    // Set by a stop() that arrives before the stage settles.
    cancelled: bool,
}

struct SessionDriver {
    config: SessionConfig,
    permission: Arc<dyn MediaPermissionProvider>,
    transport: Arc<dyn SessionTransport>,
    commands: mpsc::Receiver<Control>,
    state: watch::Sender<SessionState>,
    inferrer: SpeakingInferrer,
    pending: Option<PendingStart>,
    // A start that arrived while a cancelled open was still settling.
    queued: Option<StartReply>,
    active: Option<OpenedSession>,
}

impl SessionDriver {
    async fn run(mut self) {
        tracing::debug!(agent_id = %self.config.agent_id(), "session controller started");
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                outcome = settle(&mut self.pending) => self.handle_stage(outcome).await,
                event = next_event(&mut self.active) => self.handle_event(event).await,
                _ = self.inferrer.expired(), if self.inferrer.is_armed() => {
                    tracing::debug!("no message within {:?}, agent stopped speaking", self.inferrer.hold());
                    self.update(|s| s.set_speaking(false));
                }
            }
        }
        self.teardown().await;
    }

    fn update(&self, modify: impl FnOnce(&mut SessionState) -> bool) {
        self.state.send_if_modified(modify);
    }

    async fn handle_command(&mut self, command: Control) {
        match command {
            Control::Start(reply) => self.handle_start(reply),
            Control::Stop(reply) => {
                self.handle_stop().await;
                let _ = reply.send(());
            }
        }
    }

    fn handle_start(&mut self, reply: StartReply) {
        if let Some(pending) = &self.pending {
            if pending.cancelled && self.queued.is_none() {
                tracing::info!("start queued until the cancelled open settles");
                self.update(|s| s.begin_attempt());
                self.queued = Some(reply);
            } else {
                tracing::warn!("start ignored: a previous start has not settled yet");
                let _ = reply.send(Err(SessionError::InvalidState(Phase::Connecting)));
            }
            return;
        }
        let phase = self.state.borrow().phase();
        if phase != Phase::Idle {
            tracing::warn!("start ignored: session is already {phase}");
            let _ = reply.send(Err(SessionError::InvalidState(phase)));
            return;
        }

        tracing::info!(agent_id = %self.config.agent_id(), "requesting microphone access");
        self.update(|s| s.begin_attempt());
        let permission = self.permission.clone();
        self.pending = Some(PendingStart {
            stage: StartStage::Permission(Box::pin(async move {
                permission.request_audio_capture().await
            })),
            reply,
            cancelled: false,
        });
    }

    async fn handle_stop(&mut self) {
        self.inferrer.cancel();
        if let Some(reply) = self.queued.take() {
            let _ = reply.send(Err(SessionError::Cancelled));
        }
        match self.pending.take() {
            // Nothing is held yet, so the prompt is simply abandoned.
            Some(PendingStart {
                stage: StartStage::Permission(_),
                reply,
                ..
            }) => {
                tracing::info!("stop requested during the permission prompt; start cancelled");
                let _ = reply.send(Err(SessionError::Cancelled));
            }
            Some(mut pending) => {
                if !pending.cancelled {
                    tracing::info!("stop requested while opening; the late session will be closed");
                    pending.cancelled = true;
                }
                self.pending = Some(pending);
            }
            None => {}
        }
        match self.active.take() {
            Some(session) => {
                tracing::info!(handle = session.handle.id(), "closing session");
                self.transport.close_session(session.handle).await;
            }
            None => tracing::debug!("stop with no open session"),
        }
        self.update(|s| s.reset(None));
    }

    async fn handle_stage(&mut self, outcome: StageOutcome) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match outcome {
            StageOutcome::Permission(decision) => self.on_permission(pending, decision),
            StageOutcome::Opening(result) => self.on_opened(pending, result).await,
        }
        if self.pending.is_none() {
            if let Some(reply) = self.queued.take() {
                self.handle_start(reply);
            }
        }
    }

    fn on_permission(&mut self, pending: PendingStart, decision: PermissionDecision) {
        let reply = pending.reply;
        let refusal = match decision {
            PermissionDecision::Granted => None,
            PermissionDecision::Denied => Some(PermissionError::Denied),
            PermissionDecision::Unavailable(reason) => Some(PermissionError::Unavailable(reason)),
        };
        if let Some(refusal) = refusal {
            let error = SessionError::from(refusal);
            tracing::warn!("cannot start session: {error}");
            self.update(|s| s.reset(Some(error.clone())));
            let _ = reply.send(Err(error));
            return;
        }

        let mode = self.config.connection_mode();
        tracing::info!(%mode, "microphone granted, opening session");
        self.update(|s| s.connecting());
        let opening = open_and_subscribe(
            self.transport.clone(),
            self.config.agent_id().to_string(),
            mode,
            self.config.user_id().to_string(),
        );
        self.pending = Some(PendingStart {
            stage: StartStage::Opening(Box::pin(opening)),
            reply,
            cancelled: false,
        });
    }

    async fn on_opened(&mut self, pending: PendingStart, result: Result<OpenedSession, TransportError>) {
        let PendingStart { reply, cancelled, .. } = pending;
        match result {
            Ok(session) if cancelled => {
                tracing::info!(handle = session.handle.id(), "session opened after stop; closing it");
                self.transport.close_session(session.handle).await;
                let _ = reply.send(Err(SessionError::Cancelled));
            }
            Ok(session) => {
                tracing::info!(
                    handle = session.handle.id(),
                    conversation_id = session.handle.conversation_id().unwrap_or("-"),
                    "session active"
                );
                self.active = Some(session);
                self.update(|s| s.activate());
                let _ = reply.send(Ok(()));
            }
            Err(e) if cancelled => {
                tracing::debug!("open failed after stop: {e}");
                let _ = reply.send(Err(SessionError::Cancelled));
            }
            Err(e) => {
                let error = SessionError::from(e);
                tracing::error!("failed to open session: {error}");
                self.update(|s| s.reset(Some(error.clone())));
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn handle_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(payload)) => {
                tracing::trace!(bytes = payload.len(), "message notification");
                self.inferrer.on_message(Instant::now());
                self.update(|s| s.set_speaking(true));
            }
            Some(TransportEvent::Error(message)) => {
                tracing::warn!("transport reported an error: {message}");
            }
            Some(TransportEvent::Disconnected { reason }) => self.on_disconnect(reason).await,
            None => self.on_disconnect(None).await,
        }
    }

    async fn on_disconnect(&mut self, reason: Option<String>) {
        self.inferrer.cancel();
        if let Some(session) = self.active.take() {
            self.transport.close_session(session.handle).await;
        }
        let error = SessionError::from(TransportError::Disconnected { reason });
        tracing::error!("{error}");
        self.update(|s| s.reset(Some(error)));
    }

    async fn teardown(mut self) {
        self.inferrer.cancel();
        if let Some(pending) = self.pending.take() {
            // A connection that is still opening has to be closed once it lands.
            if let StartStage::Opening(opening) = pending.stage {
                if let Ok(session) = opening.await {
                    self.transport.close_session(session.handle).await;
                }
            }
            let _ = pending.reply.send(Err(SessionError::ControllerClosed));
        }
        if let Some(reply) = self.queued.take() {
            let _ = reply.send(Err(SessionError::ControllerClosed));
        }
        if let Some(session) = self.active.take() {
            tracing::info!(handle = session.handle.id(), "closing session on shutdown");
            self.transport.close_session(session.handle).await;
        }
        self.update(|s| s.reset(None));
        tracing::debug!("session controller stopped");
    }
}

async fn settle(pending: &mut Option<PendingStart>) -> StageOutcome {
    match pending {
        Some(PendingStart {
            stage: StartStage::Permission(decision),
            ..
        }) => StageOutcome::Permission(decision.await),
        Some(PendingStart {
            stage: StartStage::Opening(opening),
            ..
        }) => StageOutcome::Opening(opening.await),
        None => std::future::pending().await,
    }
}

async fn next_event(active: &mut Option<OpenedSession>) -> Option<TransportEvent> {
    match active {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn open_and_subscribe(
    transport: Arc<dyn SessionTransport>,
    agent_id: String,
    mode: ConnectionMode,
    user_id: String,
) -> Result<OpenedSession, TransportError> {
    let handle = transport.open_session(&agent_id, mode, &user_id).await?;
    match transport.messages(&handle).await {
        Ok(events) => Ok(OpenedSession { handle, events }),
        Err(e) => {
            transport.close_session(handle).await;
            Err(e)
        }
    }
}
