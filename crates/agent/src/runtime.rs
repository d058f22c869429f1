use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{AgentConfig, AppConfig, ApplicationError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::info;

use crate::backend::AgentBackend;
use crate::conversation::{ConsoleFrame, ConversationLoop, LoopSummary, TurnHandler};
use crate::lifecycle::{ExchangeError, Session, SessionCreateError, SessionManager};

#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    SessionCreate(#[from] SessionCreateError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl From<AskError> for ApplicationError {
    fn from(value: AskError) -> Self {
        match value {
            AskError::SessionCreate(error) => error.into(),
            AskError::Exchange(error) => error.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    SessionCreate(#[from] SessionCreateError),
    #[error("console i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Resolved agent identity plus the session manager that talks to its backend.
///
/// Built once at startup and shared; every call opens its own session and
/// closes it before returning, whatever the outcome.
#[derive(Clone)]
pub struct AgentRuntime {
    sessions: SessionManager,
    config: Arc<AgentConfig>,
    fallback_prompt: String,
    expose_backend_errors: bool,
}

impl AgentRuntime {
    pub fn new(
        sessions: SessionManager,
        config: AgentConfig,
        fallback_prompt: impl Into<String>,
        expose_backend_errors: bool,
    ) -> Self {
        Self {
            sessions,
            config: Arc::new(config),
            fallback_prompt: fallback_prompt.into(),
            expose_backend_errors,
        }
    }

    pub fn from_app_config(backend: Arc<dyn AgentBackend>, config: &AppConfig) -> Self {
        let sessions =
            SessionManager::new(backend, Duration::from_secs(config.agent.exchange_timeout_secs));
        Self::new(
            sessions,
            config.agent_config(),
            config.agent.fallback_prompt.clone(),
            config.agent.expose_backend_errors,
        )
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn expose_backend_errors(&self) -> bool {
        self.expose_backend_errors
    }

    /// Blank prompts are replaced by the configured fallback.
    pub fn prompt_or_fallback<'a>(&'a self, prompt: &'a str) -> &'a str {
        if prompt.trim().is_empty() {
            &self.fallback_prompt
        } else {
            prompt
        }
    }

    /// One prompt on a fresh session.
    pub async fn ask(&self, prompt: &str) -> Result<String, AskError> {
        let prompt = self.prompt_or_fallback(prompt);
        let mut session = self.sessions.open(&self.config).await?;
        let result = self.sessions.exchange(&mut session, prompt).await;
        self.sessions.close(&mut session).await;
        Ok(result?)
    }

    /// Runs an interactive conversation over one session held for its whole
    /// duration.
    pub async fn converse<R, W>(
        &self,
        frame: ConsoleFrame,
        input: R,
        output: &mut W,
    ) -> Result<LoopSummary, ConsoleError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut session = self.sessions.open(&self.config).await?;
        let mut conversation =
            ConversationLoop::new(frame.exposing_backend_errors(self.expose_backend_errors));

        let outcome = {
            let mut turns = SessionTurns { sessions: &self.sessions, session: &mut session };
            conversation.run(&mut turns, input, output).await
        };
        self.sessions.close(&mut session).await;

        let summary = outcome?;
        info!(
            event_name = "agent.conversation.finished",
            agent = self.config.name(),
            turns = summary.turns,
            failed_turns = summary.failed_turns,
            "conversation finished"
        );
        Ok(summary)
    }
}

struct SessionTurns<'a> {
    sessions: &'a SessionManager,
    session: &'a mut Session,
}

#[async_trait]
impl TurnHandler for SessionTurns<'_> {
    async fn respond(&mut self, prompt: &str) -> Result<String, ExchangeError> {
        self.sessions.exchange(self.session, prompt).await
    }
}
