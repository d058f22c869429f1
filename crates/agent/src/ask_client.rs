//! HTTP client for a running relay service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::backend::BackendError;
use crate::conversation::TurnHandler;
use crate::lifecycle::ExchangeError;

const ASK_PATH: &str = "/api/ask";
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Clone, Debug)]
pub struct AskClient {
    client: reqwest::Client,
    endpoint: String,
}

impl AskClient {
    /// `base_url` is the service root, e.g. `http://localhost:7071`.
    pub fn new(base_url: &str) -> Self {
        Self { client: reqwest::Client::new(), endpoint: ask_endpoint(base_url) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, reqwest::Error> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn ask(&self, prompt: &str) -> Result<String, ExchangeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(prompt.to_string())
            .send()
            .await
            .map_err(|error| BackendError::Unreachable(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;
        debug!(
            event_name = "agent.client.response",
            status = status.as_u16(),
            body_chars = body.chars().count(),
            "service answered"
        );

        if !status.is_success() {
            let body = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(BackendError::Rejected { status: status.as_u16(), body }.into());
        }
        if body.trim().is_empty() {
            return Err(ExchangeError::EmptyReply);
        }
        Ok(body)
    }
}

#[async_trait]
impl TurnHandler for AskClient {
    async fn respond(&mut self, prompt: &str) -> Result<String, ExchangeError> {
        self.ask(prompt).await
    }
}

fn ask_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with(ASK_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{ASK_PATH}")
    }
}
