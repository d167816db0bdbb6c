use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Outcome of asking for microphone capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Granted,
    Denied,
    /// No usable capture device, or the platform refused to say.
    Unavailable(String),
}

/// Grants or denies audio capture.
///
/// The controller calls this exactly once per `start()` and does not retry.
/// Implementations may prompt the user, so the call can take arbitrarily long.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaPermissionProvider: Send + Sync {
    async fn request_audio_capture(&self) -> PermissionDecision;
}
