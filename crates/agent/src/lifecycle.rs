use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{AgentConfig, ApplicationError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{AgentBackend, BackendError, SessionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Handle to one backend session.
///
/// Exchanges take `&mut Session`, so a handle can never carry two exchanges at
/// once. A handle dropped while still open (a cancelled request, for one)
/// releases its backend session on a background task.
pub struct Session {
    id: SessionId,
    state: SessionState,
    exchanges: u32,
    backend: Arc<dyn AgentBackend>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Successful exchanges completed on this session.
    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("exchanges", &self.exchanges)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        self.state = SessionState::Closed;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                event_name = "agent.session.leaked",
                session_id = %self.id,
                "session handle dropped without close outside a runtime"
            );
            return;
        };

        warn!(
            event_name = "agent.session.abandoned",
            session_id = %self.id,
            exchanges = self.exchanges,
            "session handle dropped while open; releasing in background"
        );
        let backend = Arc::clone(&self.backend);
        let id = self.id.clone();
        handle.spawn(async move {
            match backend.destroy_session(&id).await {
                Ok(()) => info!(
                    event_name = "agent.session.closed",
                    session_id = %id,
                    "abandoned agent session released"
                ),
                Err(error) => warn!(
                    event_name = "agent.session.close_failed",
                    session_id = %id,
                    error = %error,
                    "backend failed to release abandoned session"
                ),
            }
        });
    }
}

#[derive(Debug, Error)]
#[error("could not open agent session: {source}")]
pub struct SessionCreateError {
    #[from]
    source: BackendError,
}

impl SessionCreateError {
    pub fn backend_error(&self) -> &BackendError {
        &self.source
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("agent did not reply within {0:?}")]
    Timeout(Duration),
    #[error("agent returned no response")]
    EmptyReply,
    #[error("session `{0}` is already closed")]
    SessionClosed(SessionId),
}

impl From<SessionCreateError> for ApplicationError {
    fn from(value: SessionCreateError) -> Self {
        Self::SessionCreate(value.source.to_string())
    }
}

impl From<ExchangeError> for ApplicationError {
    fn from(value: ExchangeError) -> Self {
        Self::Exchange(value.to_string())
    }
}

/// Opens, drives and closes sessions against one backend.
#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn AgentBackend>,
    exchange_timeout: Duration,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn AgentBackend>, exchange_timeout: Duration) -> Self {
        Self { backend, exchange_timeout }
    }

    /// On error nothing was allocated and there is nothing to close.
    pub async fn open(&self, config: &AgentConfig) -> Result<Session, SessionCreateError> {
        let id = self.backend.create_session(config).await.map_err(|error| {
            warn!(
                event_name = "agent.session.open_failed",
                agent = config.name(),
                error = %error,
                "backend refused to open a session"
            );
            SessionCreateError::from(error)
        })?;

        info!(
            event_name = "agent.session.opened",
            session_id = %id,
            agent = config.name(),
            model = config.model_id(),
            provider =
                config.provider().map(|provider| provider.kind.as_str()).unwrap_or("default"),
            "agent session opened"
        );
        Ok(Session {
            id,
            state: SessionState::Open,
            exchanges: 0,
            backend: Arc::clone(&self.backend),
        })
    }

    /// Sends one prompt and waits for the complete reply.
    ///
    /// Every failure leaves the session open and usable for the next prompt.
    pub async fn exchange(
        &self,
        session: &mut Session,
        prompt: &str,
    ) -> Result<String, ExchangeError> {
        if !session.is_open() {
            return Err(ExchangeError::SessionClosed(session.id.clone()));
        }

        let pending = self.backend.send_and_wait(&session.id, prompt);
        let result = match tokio::time::timeout(self.exchange_timeout, pending).await {
            Ok(Ok(Some(reply))) if !reply.trim().is_empty() => Ok(reply),
            Ok(Ok(_)) => Err(ExchangeError::EmptyReply),
            Ok(Err(error)) => Err(ExchangeError::Backend(error)),
            Err(_) => Err(ExchangeError::Timeout(self.exchange_timeout)),
        };

        match &result {
            Ok(reply) => {
                session.exchanges += 1;
                debug!(
                    event_name = "agent.exchange.completed",
                    session_id = %session.id,
                    prompt_chars = prompt.chars().count(),
                    reply_chars = reply.chars().count(),
                    "exchange completed"
                );
            }
            Err(error) => warn!(
                event_name = "agent.exchange.failed",
                session_id = %session.id,
                error = %error,
                "exchange failed; session stays open"
            ),
        }

        result
    }

    /// Releases the session. Never fails: a second close is a no-op and backend
    /// errors are logged, not returned. The handle stays open until the backend
    /// call returns, so a close cancelled midway is finished by the handle's drop.
    pub async fn close(&self, session: &mut Session) {
        if !session.is_open() {
            debug!(
                event_name = "agent.session.close_skipped",
                session_id = %session.id,
                "session already closed"
            );
            return;
        }
        let released = self.backend.destroy_session(&session.id).await;
        session.state = SessionState::Closed;

        match released {
            Ok(()) => info!(
                event_name = "agent.session.closed",
                session_id = %session.id,
                exchanges = session.exchanges,
                "agent session closed"
            ),
            Err(error) => warn!(
                event_name = "agent.session.close_failed",
                session_id = %session.id,
                error = %error,
                "backend failed to release session"
            ),
        }
    }
}
