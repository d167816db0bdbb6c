use crate::client::stats::Stats;
use crate::types::{
    ClientEvent, ControlEvent, ConversationInitiation, ServerEvent, UserAudioChunk,
};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;

pub(crate) mod config;
pub(crate) mod consts;
pub(crate) mod stats;
mod utils;

pub type ClientTx = tokio::sync::mpsc::Sender<ClientEvent>;
type ServerTx = tokio::sync::broadcast::Sender<ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<ServerEvent>;

// Channel capacity, client/server transmitters, configuration, and stats
// shared with the reader task.
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!(agent_id = %self.config.agent_id(), "connected to conversation endpoint");

        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientEvent>(self.capacity);
        let (s_tx, _) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());

        // Writer: serialises outgoing events until every sender is gone, then
        // closes the socket.
        tokio::spawn(async move {
            while let Some(event) = c_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                    }
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("socket already closed: {}", e);
            }
        });

        let stats = self.stats.clone();
        // Reader: decodes server messages and broadcasts them. A `Close` event
        // is always the last thing broadcast.
        tokio::spawn(async move {
            let mut close_reason = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if let Ok(mut stats) = stats.lock() {
                                stats.record_received(event.is_audio());
                            } else {
                                tracing::error!("failed to update stats");
                            }
                            if !event.is_audio() {
                                tracing::debug!("received event: {:?}", event);
                            }
                            // No subscribers is fine; the event is dropped.
                            let _ = s_tx.send(event);
                        }
                        Err(e) => {
                            tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message of {} bytes", bin.len());
                    }
                    Message::Close(frame) => {
                        tracing::info!("connection closed: {:?}", frame);
                        close_reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        break;
                    }
                    _ => {}
                }
            }
            let _ = s_tx.send(ServerEvent::Close {
                reason: close_reason,
            });
        });
        Ok(())
    }

    /// Subscribes to server events. Each call returns an independent receiver.
    pub fn server_events(&self) -> Result<ServerRx> {
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    pub fn stats(&self) -> Result<Stats> {
        if let Ok(stats_guard) = self.stats.lock() {
            Ok(stats_guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }

    async fn send_client_event(&mut self, event: ClientEvent) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(event).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    /// Sends `conversation_initiation_client_data`; must be the first event.
    pub async fn initiate(&mut self, initiation: ConversationInitiation) -> Result<()> {
        let event = ClientEvent::Control(ControlEvent::ConversationInitiationClientData(initiation));
        self.send_client_event(event).await
    }

    pub async fn send_user_audio(&mut self, base64_pcm16: String) -> Result<()> {
        self.send_client_event(ClientEvent::Audio(UserAudioChunk::new(base64_pcm16)))
            .await?;
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_audio_sent();
        }
        Ok(())
    }

    pub async fn pong(&mut self, event_id: u64) -> Result<()> {
        self.send_client_event(ClientEvent::Control(ControlEvent::Pong { event_id }))
            .await?;
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_pong();
        }
        Ok(())
    }

    /// Drops the outgoing channel, which makes the writer close the socket.
    pub fn close(&mut self) {
        self.c_tx.take();
        self.s_tx.take();
    }
}

/// The operations a session needs from a live connection.
#[async_trait]
pub trait ConvaiConnection: Send + 'static {
    fn server_events(&self) -> Result<ServerRx>;
    fn stats(&self) -> Result<Stats>;
    async fn initiate(&mut self, initiation: ConversationInitiation) -> Result<()>;
    async fn send_user_audio(&mut self, base64_pcm16: String) -> Result<()>;
    async fn pong(&mut self, event_id: u64) -> Result<()>;
    fn close(&mut self);
}

#[async_trait]
impl ConvaiConnection for Client {
    fn server_events(&self) -> Result<ServerRx> {
        Client::server_events(self)
    }

    fn stats(&self) -> Result<Stats> {
        Client::stats(self)
    }

    async fn initiate(&mut self, initiation: ConversationInitiation) -> Result<()> {
        Client::initiate(self, initiation).await
    }

    async fn send_user_audio(&mut self, base64_pcm16: String) -> Result<()> {
        Client::send_user_audio(self, base64_pcm16).await
    }

    async fn pong(&mut self, event_id: u64) -> Result<()> {
        Client::pong(self, event_id).await
    }

    fn close(&mut self) {
        Client::close(self)
    }
}

/// Connects with an explicit config and channel capacity.
pub async fn connect_with_config(capacity: usize, config: config::Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

/// Connects to `agent_id` with default settings.
pub async fn connect(agent_id: &str) -> Result<Client> {
    let config = config::Config::new(agent_id);
    connect_with_config(consts::DEFAULT_CAPACITY, config).await
}
