use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::{AgentConfig, ProviderConfig, ProviderKind};

const DEFAULT_INSTRUCTIONS: &str = "\
1. A robot may not injure a human being...
2. A robot must obey orders given it by human beings...
3. A robot must protect its own existence...

Objective: Give me the TLDR in exactly 5 words.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub agent: AgentSettings,
    pub backend: BackendConfig,
    pub provider: ProviderSettings,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct AgentSettings {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub fallback_prompt: String,
    pub exchange_timeout_secs: u64,
    pub expose_backend_errors: bool,
}

/// The backend's own default provider, used when no alternate provider resolves.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ProviderSettings {
    /// Set only when the operator explicitly selected a provider; that makes
    /// endpoint and api key mandatory.
    pub kind: Option<ProviderKind>,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub api_version: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub agent_url: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub agent_instructions: Option<String>,
    pub model: Option<String>,
    pub fallback_prompt: Option<String>,
    pub backend_url: Option<String>,
    pub provider_kind: Option<ProviderKind>,
    pub provider_endpoint: Option<String>,
    pub provider_api_key: Option<String>,
    pub server_port: Option<u16>,
    pub client_agent_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentSettings {
                name: "RobotAgent".to_string(),
                instructions: DEFAULT_INSTRUCTIONS.to_string(),
                model: "gpt-5-mini".to_string(),
                fallback_prompt: "What are the laws?".to_string(),
                exchange_timeout_secs: 60,
                expose_backend_errors: false,
            },
            backend: BackendConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
            },
            provider: ProviderSettings {
                kind: None,
                endpoint: None,
                api_key: None,
                api_version: "2024-10-21".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 7071,
                graceful_shutdown_secs: 15,
            },
            client: ClientConfig { agent_url: "http://localhost:7071".to_string() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::Validation(format!(
                "unsupported provider `{other}` (expected azure|openai)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("relay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Resolves the immutable agent configuration.
    ///
    /// The alternate provider is populated only when both an endpoint and a
    /// credential are present; otherwise the backend's default provider applies.
    pub fn agent_config(&self) -> AgentConfig {
        let provider = match (&self.provider.endpoint, &self.provider.api_key) {
            (Some(endpoint), Some(api_key)) => Some(ProviderConfig {
                kind: self.provider.kind.unwrap_or(ProviderKind::Azure),
                endpoint_url: endpoint.clone(),
                credential: api_key.clone(),
                api_version: self.provider.api_version.clone(),
            }),
            _ => None,
        };

        AgentConfig::new(
            self.agent.name.clone(),
            self.agent.instructions.clone(),
            self.agent.model.clone(),
            provider,
        )
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(agent) = patch.agent {
            if let Some(name) = agent.name {
                self.agent.name = name;
            }
            if let Some(instructions) = agent.instructions {
                self.agent.instructions = instructions;
            }
            if let Some(model) = agent.model {
                self.agent.model = model;
            }
            if let Some(fallback_prompt) = agent.fallback_prompt {
                self.agent.fallback_prompt = fallback_prompt;
            }
            if let Some(exchange_timeout_secs) = agent.exchange_timeout_secs {
                self.agent.exchange_timeout_secs = exchange_timeout_secs;
            }
            if let Some(expose_backend_errors) = agent.expose_backend_errors {
                self.agent.expose_backend_errors = expose_backend_errors;
            }
        }

        if let Some(backend) = patch.backend {
            if let Some(base_url) = backend.base_url {
                self.backend.base_url = base_url;
            }
            if let Some(backend_api_key_value) = backend.api_key {
                self.backend.api_key = Some(secret_value(backend_api_key_value));
            }
        }

        if let Some(provider) = patch.provider {
            if let Some(kind) = provider.kind {
                self.provider.kind = Some(kind);
            }
            if let Some(endpoint) = provider.endpoint {
                self.provider.endpoint = Some(endpoint);
            }
            if let Some(provider_api_key_value) = provider.api_key {
                self.provider.api_key = Some(secret_value(provider_api_key_value));
            }
            if let Some(api_version) = provider.api_version {
                self.provider.api_version = api_version;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(client) = patch.client {
            if let Some(agent_url) = client.agent_url {
                self.client.agent_url = agent_url;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RELAY_AGENT_NAME") {
            self.agent.name = value;
        }
        if let Some(value) = read_env("RELAY_AGENT_INSTRUCTIONS") {
            self.agent.instructions = value;
        }
        if let Some(value) = read_env("RELAY_MODEL").or_else(|| read_env("AZURE_OPENAI_MODEL")) {
            self.agent.model = value;
        }
        if let Some(value) = read_env("RELAY_FALLBACK_PROMPT") {
            self.agent.fallback_prompt = value;
        }
        if let Some(value) = read_env("RELAY_EXCHANGE_TIMEOUT_SECS") {
            self.agent.exchange_timeout_secs = parse_u64("RELAY_EXCHANGE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAY_EXPOSE_BACKEND_ERRORS") {
            self.agent.expose_backend_errors = parse_bool("RELAY_EXPOSE_BACKEND_ERRORS", &value)?;
        }

        if let Some(value) = read_env("RELAY_BACKEND_URL") {
            self.backend.base_url = value;
        }
        if let Some(value) = read_env("RELAY_BACKEND_API_KEY") {
            self.backend.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("RELAY_PROVIDER") {
            self.provider.kind = Some(value.parse()?);
        }
        let endpoint =
            read_env("RELAY_PROVIDER_ENDPOINT").or_else(|| read_env("AZURE_OPENAI_ENDPOINT"));
        if let Some(value) = endpoint {
            self.provider.endpoint = Some(value);
        }
        let api_key =
            read_env("RELAY_PROVIDER_API_KEY").or_else(|| read_env("AZURE_OPENAI_API_KEY"));
        if let Some(value) = api_key {
            self.provider.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("RELAY_PROVIDER_API_VERSION") {
            self.provider.api_version = value;
        }

        if let Some(value) = read_env("RELAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RELAY_SERVER_PORT") {
            self.server.port = parse_u16("RELAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RELAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RELAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("RELAY_CLIENT_AGENT_URL").or_else(|| read_env("AGENT_URL")) {
            self.client.agent_url = value;
        }

        let log_level = read_env("RELAY_LOGGING_LEVEL").or_else(|| read_env("RELAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("RELAY_LOGGING_FORMAT").or_else(|| read_env("RELAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(instructions) = overrides.agent_instructions {
            self.agent.instructions = instructions;
        }
        if let Some(model) = overrides.model {
            self.agent.model = model;
        }
        if let Some(fallback_prompt) = overrides.fallback_prompt {
            self.agent.fallback_prompt = fallback_prompt;
        }
        if let Some(backend_url) = overrides.backend_url {
            self.backend.base_url = backend_url;
        }
        if let Some(kind) = overrides.provider_kind {
            self.provider.kind = Some(kind);
        }
        if let Some(endpoint) = overrides.provider_endpoint {
            self.provider.endpoint = Some(endpoint);
        }
        if let Some(provider_api_key) = overrides.provider_api_key {
            self.provider.api_key = Some(secret_value(provider_api_key));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(agent_url) = overrides.client_agent_url {
            self.client.agent_url = agent_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_agent(&self.agent)?;
        validate_backend(&self.backend)?;
        validate_provider(&self.provider)?;
        validate_server(&self.server)?;
        validate_client(&self.client)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("relay.toml"), PathBuf::from("config/relay.toml")]
        .into_iter()
        .find(|path| path.exists())
}

/// Returns the config file `AppConfig::load` would read with default options.
pub fn detect_config_path() -> Option<PathBuf> {
    resolve_config_path(None)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_agent(agent: &AgentSettings) -> Result<(), ConfigError> {
    if agent.name.trim().is_empty() {
        return Err(ConfigError::Validation("agent.name must not be empty".to_string()));
    }
    if agent.instructions.trim().is_empty() {
        return Err(ConfigError::Validation(
            "agent.instructions must not be empty (set RELAY_AGENT_INSTRUCTIONS)".to_string(),
        ));
    }
    if agent.model.trim().is_empty() {
        return Err(ConfigError::Validation("agent.model must not be empty".to_string()));
    }
    if agent.fallback_prompt.trim().is_empty() {
        return Err(ConfigError::Validation(
            "agent.fallback_prompt must not be empty".to_string(),
        ));
    }
    if agent.exchange_timeout_secs == 0 || agent.exchange_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "agent.exchange_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    Ok(())
}

fn validate_backend(backend: &BackendConfig) -> Result<(), ConfigError> {
    if !is_http_url(&backend.base_url) {
        return Err(ConfigError::Validation(
            "backend.base_url must start with http:// or https:// (set RELAY_BACKEND_URL)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(provider: &ProviderSettings) -> Result<(), ConfigError> {
    if let Some(kind) = provider.kind {
        let endpoint_missing =
            provider.endpoint.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if endpoint_missing {
            return Err(ConfigError::Validation(format!(
                "provider.endpoint is required when provider `{}` is selected (set RELAY_PROVIDER_ENDPOINT or AZURE_OPENAI_ENDPOINT)",
                kind.as_str()
            )));
        }

        let key_missing = provider
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if key_missing {
            return Err(ConfigError::Validation(format!(
                "provider.api_key is required when provider `{}` is selected (set RELAY_PROVIDER_API_KEY or AZURE_OPENAI_API_KEY)",
                kind.as_str()
            )));
        }
    }

    if let Some(endpoint) = &provider.endpoint {
        if !is_http_url(endpoint) {
            return Err(ConfigError::Validation(
                "provider.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    if provider.api_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "provider.api_version must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_client(client: &ClientConfig) -> Result<(), ConfigError> {
    if !is_http_url(&client.agent_url) {
        return Err(ConfigError::Validation(
            "client.agent_url must start with http:// or https:// (set AGENT_URL)".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    agent: Option<AgentPatch>,
    backend: Option<BackendPatch>,
    provider: Option<ProviderPatch>,
    server: Option<ServerPatch>,
    client: Option<ClientPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    name: Option<String>,
    instructions: Option<String>,
    model: Option<String>,
    fallback_prompt: Option<String>,
    exchange_timeout_secs: Option<u64>,
    expose_backend_errors: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendPatch {
    base_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    kind: Option<ProviderKind>,
    endpoint: Option<String>,
    api_key: Option<String>,
    api_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientPatch {
    agent_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

/// Every environment key `AppConfig::load` consults.
pub const ENV_KEYS: &[&str] = &[
    "RELAY_AGENT_NAME",
    "RELAY_AGENT_INSTRUCTIONS",
    "RELAY_MODEL",
    "AZURE_OPENAI_MODEL",
    "RELAY_FALLBACK_PROMPT",
    "RELAY_EXCHANGE_TIMEOUT_SECS",
    "RELAY_EXPOSE_BACKEND_ERRORS",
    "RELAY_BACKEND_URL",
    "RELAY_BACKEND_API_KEY",
    "RELAY_PROVIDER",
    "RELAY_PROVIDER_ENDPOINT",
    "AZURE_OPENAI_ENDPOINT",
    "RELAY_PROVIDER_API_KEY",
    "AZURE_OPENAI_API_KEY",
    "RELAY_PROVIDER_API_VERSION",
    "RELAY_SERVER_BIND_ADDRESS",
    "RELAY_SERVER_PORT",
    "RELAY_SERVER_GRACEFUL_SHUTDOWN_SECS",
    "RELAY_CLIENT_AGENT_URL",
    "AGENT_URL",
    "RELAY_LOGGING_LEVEL",
    "RELAY_LOG_LEVEL",
    "RELAY_LOGGING_FORMAT",
    "RELAY_LOG_FORMAT",
];
