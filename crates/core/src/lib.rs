//! Session lifecycle for a realtime voice agent front-end.
//!
//! The [`SessionController`] owns the session state. It asks a
//! [`MediaPermissionProvider`] for the microphone, opens a
//! [`SessionTransport`] to the agent, and derives the "agent is speaking"
//! flag from the transport's message notifications. Front-ends observe the
//! state and call `start()`/`stop()`; nothing else is exposed.

pub mod config;
pub mod controller;
pub mod error;
pub mod generic_types;
pub mod permission;
pub mod session_state;
pub mod speaking;
pub mod transport;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use error::{PermissionError, SessionError, TransportError};
pub use generic_types::{ConnectionMode, SessionHandle, TransportEvent};
pub use permission::{MediaPermissionProvider, PermissionDecision};
pub use session_state::{Phase, SessionState};
pub use transport::SessionTransport;
