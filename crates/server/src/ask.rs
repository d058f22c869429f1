use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{HeaderName, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use relay_agent::{AgentRuntime, AskError, ExchangeError};
use relay_core::{ApplicationError, InterfaceError, NO_RESPONSE};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl From<TransportError> for ApplicationError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value.to_string())
    }
}

#[derive(Clone)]
pub struct AskState {
    runtime: AgentRuntime,
}

pub fn router(runtime: AgentRuntime) -> Router {
    Router::new()
        .route("/api/ask", post(ask))
        .route("/ask", post(ask))
        .with_state(AskState { runtime })
}

/// Each call runs on its own session; nothing is shared between requests
/// except the resolved agent configuration and the backend client. A request
/// dropped mid-exchange still has its session released by the session handle.
pub async fn ask(State(state): State<AskState>, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    match answer(&state.runtime, &body).await {
        Ok(reply) => {
            info!(
                event_name = "server.ask.answered",
                correlation_id = %correlation_id,
                reply_chars = reply.chars().count(),
                "ask request answered"
            );
            plain_text(StatusCode::OK, &correlation_id, reply)
        }
        Err(error) => {
            let error = error.into_interface(correlation_id.clone());
            warn!(
                event_name = "server.ask.failed",
                correlation_id = %correlation_id,
                error = %error,
                "ask request failed"
            );
            let body = error.render(state.runtime.expose_backend_errors());
            plain_text(status_for(&error), &correlation_id, body)
        }
    }
}

async fn answer(runtime: &AgentRuntime, body: &[u8]) -> Result<String, ApplicationError> {
    let prompt = std::str::from_utf8(body).map_err(TransportError::from)?;
    match runtime.ask(prompt).await {
        Ok(reply) => Ok(reply),
        Err(AskError::Exchange(ExchangeError::EmptyReply)) => Ok(NO_RESPONSE.to_string()),
        Err(error) => Err(error.into()),
    }
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn plain_text(status: StatusCode, correlation_id: &str, body: String) -> Response {
    (
        status,
        [(CONTENT_TYPE, TEXT_PLAIN.to_string()), (CORRELATION_HEADER, correlation_id.to_string())],
        body,
    )
        .into_response()
}
