//! Session backend over an OpenAI-compatible `chat/completions` endpoint.
//!
//! The wire protocol is stateless, so the conversation history that makes up a
//! session lives in this process, keyed by a generated session id. Opening a
//! session resolves the route (default backend, Azure deployment or generic
//! OpenAI-compatible provider) and its credential once, then checks the route
//! with an authenticated model listing before any history is allocated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{AgentConfig, AppConfig, ProviderKind};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{AgentBackend, BackendError, SessionId};
use crate::credential::{CredentialChain, CredentialProvider, EnvCredential, StaticCredential};

pub const BACKEND_KEY_ENV_FALLBACK: &str = "OPENAI_API_KEY";

const ERROR_BODY_LIMIT: usize = 512;
const SESSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self { role: "system", content: content.to_string() }
    }

    fn user(content: &str) -> Self {
        Self { role: "user", content: content.to_string() }
    }

    fn assistant(content: &str) -> Self {
        Self { role: "assistant", content: content.to_string() }
    }
}

#[derive(Clone)]
enum Auth {
    None,
    Bearer(SecretString),
    ApiKey(SecretString),
}

impl Auth {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::None => request,
            Self::Bearer(token) => request.bearer_auth(token.expose_secret()),
            Self::ApiKey(key) => request.header("api-key", key.expose_secret()),
        }
    }
}

#[derive(Clone)]
struct Route {
    url: String,
    /// Authenticated listing used to check reachability and credentials on open.
    models_url: String,
    model: String,
    auth: Auth,
}

struct ChatSession {
    route: Route,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    base_url: String,
    credential: Option<Arc<dyn CredentialProvider>>,
    sessions: Mutex<HashMap<SessionId, ChatSession>>,
}

impl ChatCompletionsBackend {
    /// `base_url` is the default provider, e.g. `http://localhost:11434/v1`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credential: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Backend for `config.backend`. The configured key is presented first;
    /// `OPENAI_API_KEY` is consulted on each open when it was set at startup.
    pub fn from_app_config(config: &AppConfig) -> Self {
        let backend = Self::new(config.backend.base_url.clone());

        let mut chain = CredentialChain::new();
        if let Some(api_key) = &config.backend.api_key {
            chain = chain.with(StaticCredential::new(api_key.clone()));
        }
        let fallback = EnvCredential::new(BACKEND_KEY_ENV_FALLBACK);
        if fallback.is_set() {
            chain = chain.with(fallback);
        }

        if chain.is_empty() {
            backend
        } else {
            backend.with_credential(Arc::new(chain))
        }
    }

    /// Credential presented as a bearer token to the default provider.
    pub fn with_credential(mut self, credential: Arc<dyn CredentialProvider>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, ChatSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn route_for(&self, config: &AgentConfig) -> Result<Route, BackendError> {
        if let Some(route) = provider_route(config) {
            return Ok(route);
        }

        let auth = match &self.credential {
            Some(credential) => Auth::Bearer(
                credential
                    .get_credential()
                    .await
                    .map_err(|error| BackendError::Unauthorized(error.to_string()))?,
            ),
            None => Auth::None,
        };

        let base_url = self.base_url.trim_end_matches('/');
        Ok(Route {
            url: format!("{base_url}/chat/completions"),
            models_url: format!("{base_url}/models"),
            model: config.model_id().to_string(),
            auth,
        })
    }

    /// Connection failures and rejected credentials fail the open. Any other
    /// answer, including a backend without a model listing, counts as reachable.
    async fn check_route(&self, route: &Route) -> Result<(), BackendError> {
        let request = self.client.get(&route.models_url).timeout(SESSION_CHECK_TIMEOUT);
        let response = route
            .auth
            .apply(request)
            .send()
            .await
            .map_err(|error| BackendError::Unreachable(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unauthorized(truncate_body(&body)));
        }

        debug!(
            event_name = "agent.backend.route_checked",
            status = status.as_u16(),
            "chat completions route reachable"
        );
        Ok(())
    }
}

fn provider_route(config: &AgentConfig) -> Option<Route> {
    let provider = config.provider()?;
    let endpoint = provider.endpoint_url.trim_end_matches('/');
    let model = config.model_id().to_string();

    let route = match provider.kind {
        ProviderKind::Azure => Route {
            url: format!(
                "{endpoint}/openai/deployments/{model}/chat/completions?api-version={}",
                provider.api_version
            ),
            models_url: format!("{endpoint}/openai/models?api-version={}", provider.api_version),
            model,
            auth: Auth::ApiKey(provider.credential.clone()),
        },
        ProviderKind::OpenAi => Route {
            url: format!("{endpoint}/chat/completions"),
            models_url: format!("{endpoint}/models"),
            model,
            auth: Auth::Bearer(provider.credential.clone()),
        },
    };
    Some(route)
}

fn parse_reply(body: &str) -> Result<Option<String>, BackendError> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty()))
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[async_trait]
impl AgentBackend for ChatCompletionsBackend {
    async fn create_session(&self, config: &AgentConfig) -> Result<SessionId, BackendError> {
        let route = self.route_for(config).await?;
        self.check_route(&route).await?;
        let session_id = SessionId(Uuid::new_v4().to_string());

        debug!(
            event_name = "agent.backend.session_allocated",
            session_id = %session_id,
            model = %route.model,
            "allocated chat completions session"
        );
        self.sessions().insert(
            session_id.clone(),
            ChatSession {
                route,
                messages: vec![ChatMessage::system(config.system_instruction())],
            },
        );

        Ok(session_id)
    }

    async fn send_and_wait(
        &self,
        session: &SessionId,
        prompt: &str,
    ) -> Result<Option<String>, BackendError> {
        let (route, mut messages) = {
            let sessions = self.sessions();
            let entry =
                sessions.get(session).ok_or_else(|| BackendError::UnknownSession(session.clone()))?;
            (entry.route.clone(), entry.messages.clone())
        };
        messages.push(ChatMessage::user(prompt));

        let payload = ChatCompletionRequest { model: &route.model, messages: &messages };
        let request = route.auth.apply(self.client.post(&route.url).json(&payload));

        let response =
            request.send().await.map_err(|error| BackendError::Unreachable(error.to_string()))?;
        let status = response.status();
        let body =
            response.text().await.map_err(|error| BackendError::Unreachable(error.to_string()))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized(truncate_body(&body)));
        }
        if !status.is_success() {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let reply = parse_reply(&body)?;
        if let Some(reply) = &reply {
            if let Some(entry) = self.sessions().get_mut(session) {
                entry.messages.push(ChatMessage::user(prompt));
                entry.messages.push(ChatMessage::assistant(reply));
            }
        }

        Ok(reply)
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<(), BackendError> {
        match self.sessions().remove(session) {
            Some(_) => Ok(()),
            None => Err(BackendError::UnknownSession(session.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use std::time::Duration;

    use axum::{
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use relay_core::{AgentConfig, ProviderConfig, ProviderKind};
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::{json, Value};

    use super::{parse_reply, provider_route, Auth, ChatCompletionsBackend};
    use crate::backend::{AgentBackend, BackendError, SessionId};
    use crate::credential::StaticCredential;
    use crate::lifecycle::SessionManager;

    fn agent_config(provider: Option<ProviderConfig>) -> AgentConfig {
        AgentConfig::new("RobotAgent", "Answer in five words.", "gpt-5-mini", provider)
    }

    async fn counting_completions(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
        let messages = body["messages"].as_array().map(Vec::len).unwrap_or_default();
        let system = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("none")
            .to_string();
        Json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": format!("messages={messages} auth={auth} system={system}")
                }
            }]
        }))
    }

    async fn spawn_backend(router: Router) -> String {
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let address = listener.local_addr().expect("local address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}/v1")
    }

    #[test]
    fn parse_reply_extracts_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant",
            "content":"Robots protect, obey, survive."}}]}"#;
        assert_eq!(
            parse_reply(body).expect("valid body"),
            Some("Robots protect, obey, survive.".to_string())
        );
    }

    #[test]
    fn parse_reply_treats_missing_or_blank_content_as_no_reply() {
        assert_eq!(parse_reply(r#"{"choices":[]}"#).expect("valid body"), None);
        assert_eq!(parse_reply(r#"{}"#).expect("valid body"), None);
        assert_eq!(
            parse_reply(r#"{"choices":[{"message":{"content":"   "}}]}"#).expect("valid body"),
            None
        );
        assert_eq!(
            parse_reply(r#"{"choices":[{"message":{"content":null}}]}"#).expect("valid body"),
            None
        );
    }

    #[test]
    fn parse_reply_rejects_non_json() {
        assert!(matches!(parse_reply("<html>"), Err(BackendError::InvalidResponse(_))));
    }

    #[test]
    fn azure_provider_routes_to_deployment_with_api_key() {
        let config = agent_config(Some(ProviderConfig {
            kind: ProviderKind::Azure,
            endpoint_url: "https://robots.openai.azure.com/".to_string(),
            credential: SecretString::from("azure-key".to_string()),
            api_version: "2024-10-21".to_string(),
        }));

        let route = provider_route(&config).expect("provider route");
        assert_eq!(
            route.url,
            "https://robots.openai.azure.com/openai/deployments/gpt-5-mini/chat/completions\
             ?api-version=2024-10-21"
        );
        assert_eq!(
            route.models_url,
            "https://robots.openai.azure.com/openai/models?api-version=2024-10-21"
        );
        assert!(matches!(route.auth, Auth::ApiKey(ref key) if key.expose_secret() == "azure-key"));
    }

    #[test]
    fn openai_provider_routes_to_chat_completions_with_bearer() {
        let config = agent_config(Some(ProviderConfig {
            kind: ProviderKind::OpenAi,
            endpoint_url: "https://api.example.com/v1".to_string(),
            credential: SecretString::from("sk-test".to_string()),
            api_version: "2024-10-21".to_string(),
        }));

        let route = provider_route(&config).expect("provider route");
        assert_eq!(route.url, "https://api.example.com/v1/chat/completions");
        assert_eq!(route.models_url, "https://api.example.com/v1/models");
        assert!(matches!(route.auth, Auth::Bearer(_)));
    }

    #[test]
    fn no_provider_means_default_route() {
        assert!(provider_route(&agent_config(None)).is_none());
    }

    #[tokio::test]
    async fn session_history_accumulates_across_exchanges() {
        let base_url =
            spawn_backend(Router::new().route("/v1/chat/completions", post(counting_completions)))
                .await;
        let backend = ChatCompletionsBackend::new(base_url).with_credential(Arc::new(
            StaticCredential::new(SecretString::from("local-key".to_string())),
        ));

        let session = backend.create_session(&agent_config(None)).await.expect("session opens");
        assert_eq!(backend.open_sessions(), 1);

        let first = backend.send_and_wait(&session, "Hello").await.expect("first reply");
        assert_eq!(
            first.as_deref(),
            Some("messages=2 auth=Bearer local-key system=Answer in five words.")
        );

        let second = backend.send_and_wait(&session, "And again").await.expect("second reply");
        assert!(second.expect("reply text").starts_with("messages=4 "));

        backend.destroy_session(&session).await.expect("destroy succeeds");
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn failed_exchange_leaves_history_untouched() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["messages"]
                    .as_array()
                    .and_then(|messages| messages.last())
                    .and_then(|message| message["content"].as_str())
                    .unwrap_or_default()
                    .to_string();
                if prompt == "boom" {
                    return Err((StatusCode::INTERNAL_SERVER_ERROR, "model exploded".to_string()));
                }
                let count = body["messages"].as_array().map(Vec::len).unwrap_or_default();
                Ok(Json(json!({"choices":[{"message":{"content": format!("messages={count}")}}]})))
            }),
        );
        let backend = ChatCompletionsBackend::new(spawn_backend(router).await);
        let session = backend.create_session(&agent_config(None)).await.expect("session opens");

        let error = backend.send_and_wait(&session, "boom").await.expect_err("backend fails");
        assert_eq!(
            error,
            BackendError::Rejected { status: 500, body: "model exploded".to_string() }
        );

        let reply = backend.send_and_wait(&session, "Hello").await.expect("session still usable");
        assert_eq!(reply.as_deref(), Some("messages=2"));
    }

    #[tokio::test]
    async fn unauthorized_status_maps_to_unauthorized_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
        );
        let backend = ChatCompletionsBackend::new(spawn_backend(router).await);
        let session = backend.create_session(&agent_config(None)).await.expect("session opens");

        let error = backend.send_and_wait(&session, "Hello").await.expect_err("unauthorized");
        assert_eq!(error, BackendError::Unauthorized("invalid api key".to_string()));
    }

    #[tokio::test]
    async fn open_against_unreachable_backend_fails_without_allocating() {
        let backend = Arc::new(ChatCompletionsBackend::new("http://127.0.0.1:9/v1"));
        let sessions = SessionManager::new(backend.clone(), Duration::from_secs(5));

        let error = sessions.open(&agent_config(None)).await.expect_err("nothing listens");

        assert!(matches!(error.backend_error(), BackendError::Unreachable(_)));
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn open_with_rejected_credentials_fails_as_unauthorized() {
        let router = Router::new()
            .route("/v1/models", get(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }))
            .route("/v1/chat/completions", post(counting_completions));
        let backend = Arc::new(ChatCompletionsBackend::new(spawn_backend(router).await));
        let sessions = SessionManager::new(backend.clone(), Duration::from_secs(5));

        let error = sessions.open(&agent_config(None)).await.expect_err("credentials rejected");

        assert_eq!(
            error.backend_error(),
            &BackendError::Unauthorized("invalid api key".to_string())
        );
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn open_presents_the_credential_to_the_model_listing() {
        let router = Router::new().route(
            "/v1/models",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|value| value.to_str().ok()) {
                    Some("Bearer local-key") => (StatusCode::OK, r#"{"data":[]}"#),
                    _ => (StatusCode::FORBIDDEN, "missing key"),
                }
            }),
        );
        let base_url = spawn_backend(router).await;

        let anonymous = ChatCompletionsBackend::new(base_url.clone());
        assert_eq!(
            anonymous.create_session(&agent_config(None)).await,
            Err(BackendError::Unauthorized("missing key".to_string()))
        );

        let keyed = ChatCompletionsBackend::new(base_url).with_credential(Arc::new(
            StaticCredential::new(SecretString::from("local-key".to_string())),
        ));
        let session = keyed.create_session(&agent_config(None)).await.expect("session opens");
        keyed.destroy_session(&session).await.expect("destroy succeeds");
    }

    #[tokio::test]
    async fn unknown_sessions_are_rejected() {
        let backend = ChatCompletionsBackend::new("http://127.0.0.1:9/v1");
        let ghost = SessionId("ghost".to_string());

        assert_eq!(
            backend.send_and_wait(&ghost, "Hello").await,
            Err(BackendError::UnknownSession(ghost.clone()))
        );
        assert_eq!(
            backend.destroy_session(&ghost).await,
            Err(BackendError::UnknownSession(ghost.clone()))
        );
    }
}
