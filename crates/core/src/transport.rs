use crate::error::TransportError;
use crate::generic_types::{ConnectionMode, SessionHandle, TransportEvent};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

/// A realtime, bidirectional-audio connection to a remote conversational agent.
///
/// The controller drives a transport through this trait only, so the same
/// lifecycle logic runs against a websocket client in the service and a mock
/// in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Opens a session with `agent_id` on behalf of `user_id`.
    async fn open_session(
        &self,
        agent_id: &str,
        mode: ConnectionMode,
        user_id: &str,
    ) -> Result<SessionHandle, TransportError>;

    /// Releases everything held for `handle`. Closing an unknown or already
    /// closed handle is a no-op.
    async fn close_session(&self, handle: SessionHandle);

    /// Returns the event stream for an open session. The channel closing is
    /// treated the same as `TransportEvent::Disconnected`.
    async fn messages(
        &self,
        handle: &SessionHandle,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;
}
