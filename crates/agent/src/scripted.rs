//! Deterministic in-memory backend for local runs and contract tests.
//!
//! Replies are taken from a queue; once it is empty every prompt is echoed back
//! as `echo: <prompt>`. Counters record every allocation and release so tests
//! can assert that opens and closes balance.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::AgentConfig;

use crate::backend::{AgentBackend, BackendError, SessionId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    Empty,
    Fail(BackendError),
    /// Replies with the text only after the delay elapses.
    Delayed(Duration, String),
}

impl ScriptedReply {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<ScriptedReply>,
    open: HashSet<SessionId>,
    next_id: u64,
    opened: usize,
    closed: usize,
    prompts: Vec<String>,
    instructions: Vec<String>,
    create_failure: Option<BackendError>,
    destroy_failure: Option<BackendError>,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        let backend = Self::default();
        backend.state().replies.extend(replies);
        backend
    }

    /// Every subsequent `create_session` fails with `error`.
    pub fn failing_create(self, error: BackendError) -> Self {
        self.state().create_failure = Some(error);
        self
    }

    /// Every subsequent `destroy_session` fails with `error` after releasing the session.
    pub fn failing_destroy(self, error: BackendError) -> Self {
        self.state().destroy_failure = Some(error);
        self
    }

    pub fn opened(&self) -> usize {
        self.state().opened
    }

    pub fn closed(&self) -> usize {
        self.state().closed
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open.len()
    }

    /// Prompts in the order the backend received them.
    pub fn prompts(&self) -> Vec<String> {
        self.state().prompts.clone()
    }

    /// System instructions of every session opened so far.
    pub fn instructions(&self) -> Vec<String> {
        self.state().instructions.clone()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn create_session(&self, config: &AgentConfig) -> Result<SessionId, BackendError> {
        let mut state = self.state();
        if let Some(error) = state.create_failure.clone() {
            return Err(error);
        }

        state.next_id += 1;
        let session_id = SessionId(format!("scripted-{}", state.next_id));
        state.open.insert(session_id.clone());
        state.opened += 1;
        state.instructions.push(config.system_instruction().to_string());
        Ok(session_id)
    }

    async fn send_and_wait(
        &self,
        session: &SessionId,
        prompt: &str,
    ) -> Result<Option<String>, BackendError> {
        let reply = {
            let mut state = self.state();
            if !state.open.contains(session) {
                return Err(BackendError::UnknownSession(session.clone()));
            }
            state.prompts.push(prompt.to_string());
            state.replies.pop_front()
        };

        match reply {
            None => Ok(Some(format!("echo: {prompt}"))),
            Some(ScriptedReply::Text(text)) => Ok(Some(text)),
            Some(ScriptedReply::Empty) => Ok(None),
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(Some(text))
            }
        }
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.open.remove(session) {
            return Err(BackendError::UnknownSession(session.clone()));
        }
        state.closed += 1;

        match state.destroy_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
