use std::env;
use std::fs;
use std::path::Path;

use relay_core::config::{detect_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    match load_config("config", LoadOptions::default()) {
        Ok(config) => CommandResult::text(render(&config)),
        Err(result) => result,
    }
}

pub fn render(config: &AppConfig) -> String {
    let config_file_path = detect_config_path();
    let sources = Sources {
        doc: load_config_file_doc(config_file_path.as_deref()),
        path: config_file_path.as_deref(),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: &str, env_keys: &[&str]| {
        lines.push(render_line(key, value, sources.field_source(key, env_keys)));
    };

    push("agent.name", &config.agent.name, &["RELAY_AGENT_NAME"]);
    push(
        "agent.instructions",
        &summarize(&config.agent.instructions),
        &["RELAY_AGENT_INSTRUCTIONS"],
    );
    push("agent.model", &config.agent.model, &["RELAY_MODEL", "AZURE_OPENAI_MODEL"]);
    push("agent.fallback_prompt", &config.agent.fallback_prompt, &["RELAY_FALLBACK_PROMPT"]);
    push(
        "agent.exchange_timeout_secs",
        &config.agent.exchange_timeout_secs.to_string(),
        &["RELAY_EXCHANGE_TIMEOUT_SECS"],
    );
    push(
        "agent.expose_backend_errors",
        &config.agent.expose_backend_errors.to_string(),
        &["RELAY_EXPOSE_BACKEND_ERRORS"],
    );

    push("backend.base_url", &config.backend.base_url, &["RELAY_BACKEND_URL"]);
    push(
        "backend.api_key",
        &redact_optional(config.backend.api_key.as_ref()),
        &["RELAY_BACKEND_API_KEY"],
    );

    push(
        "provider.kind",
        config.provider.kind.map(|kind| kind.as_str()).unwrap_or("<unset>"),
        &["RELAY_PROVIDER"],
    );
    push(
        "provider.endpoint",
        config.provider.endpoint.as_deref().unwrap_or("<unset>"),
        &["RELAY_PROVIDER_ENDPOINT", "AZURE_OPENAI_ENDPOINT"],
    );
    push(
        "provider.api_key",
        &redact_optional(config.provider.api_key.as_ref()),
        &["RELAY_PROVIDER_API_KEY", "AZURE_OPENAI_API_KEY"],
    );
    push("provider.api_version", &config.provider.api_version, &["RELAY_PROVIDER_API_VERSION"]);

    push("server.bind_address", &config.server.bind_address, &["RELAY_SERVER_BIND_ADDRESS"]);
    push("server.port", &config.server.port.to_string(), &["RELAY_SERVER_PORT"]);
    push(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        &["RELAY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    );

    push("client.agent_url", &config.client.agent_url, &["RELAY_CLIENT_AGENT_URL", "AGENT_URL"]);

    push("logging.level", &config.logging.level, &["RELAY_LOGGING_LEVEL", "RELAY_LOG_LEVEL"]);
    push(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["RELAY_LOGGING_FORMAT", "RELAY_LOG_FORMAT"],
    );

    let resolved = match config.agent_config().provider() {
        Some(provider) => format!("{} ({})", provider.kind.as_str(), provider.endpoint_url),
        None => "default backend".to_string(),
    };
    lines.push(format!("resolved provider: {resolved}"));

    lines.join("\n")
}

struct Sources<'a> {
    doc: Option<Value>,
    path: Option<&'a Path>,
}

impl Sources<'_> {
    /// The first set env key wins; aliases are listed after the primary key.
    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys
            .iter()
            .find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty()))
        {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Multi-line instructions are shown as their first line plus a line count.
fn summarize(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default();
    let rest = lines.count();
    if rest == 0 {
        first.to_string()
    } else {
        format!("{first} (+{rest} lines)")
    }
}

fn redact_optional(secret: Option<&SecretString>) -> String {
    secret.map(|value| redact_token(value.expose_secret())).unwrap_or_else(|| "<unset>".to_string())
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{redact_token, summarize};

    #[test]
    fn redaction_keeps_only_the_key_prefix() {
        assert_eq!(redact_token("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_token("0123456789abcdef"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn instructions_are_summarized_to_first_line() {
        assert_eq!(summarize("one line"), "one line");
        assert_eq!(summarize("first\nsecond\nthird"), "first (+2 lines)");
    }
}
