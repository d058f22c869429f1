use std::fmt;

use async_trait::async_trait;
use relay_core::AgentConfig;
use thiserror::Error;

/// Backend-assigned session identifier. Opaque to everything above the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("agent backend is unreachable: {0}")]
    Unreachable(String),
    #[error("agent backend rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("agent backend returned status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("agent backend returned an unreadable reply: {0}")]
    InvalidResponse(String),
    #[error("agent backend has no session `{0}`")]
    UnknownSession(SessionId),
}

/// A remote conversational backend that owns session state.
///
/// Every successful `create_session` allocates exactly one backend resource
/// that `destroy_session` releases. Callers never issue two `send_and_wait`
/// calls on the same session concurrently.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn create_session(&self, config: &AgentConfig) -> Result<SessionId, BackendError>;

    /// Waits for the complete reply. `Ok(None)` means the backend answered with no text.
    async fn send_and_wait(
        &self,
        session: &SessionId,
        prompt: &str,
    ) -> Result<Option<String>, BackendError>;

    async fn destroy_session(&self, session: &SessionId) -> Result<(), BackendError>;
}
