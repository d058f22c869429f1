use std::sync::Arc;

use relay_agent::{AgentRuntime, ChatCompletionsBackend};
use relay_core::config::AppConfig;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: AgentRuntime,
}

pub fn bootstrap_with_config(config: AppConfig) -> Application {
    let backend = Arc::new(ChatCompletionsBackend::from_app_config(&config));
    let runtime = AgentRuntime::from_app_config(backend, &config);
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        agent = runtime.config().name(),
        model = runtime.config().model_id(),
        provider = runtime
            .config()
            .provider()
            .map(|provider| provider.kind.as_str())
            .unwrap_or("default"),
        "agent configuration resolved"
    );
    Application { config, runtime }
}

#[cfg(test)]
mod tests {
    use relay_core::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
    use relay_core::ProviderKind;

    use crate::bootstrap::{bootstrap_with_config, Application};

    fn bootstrap(options: LoadOptions) -> Result<Application, ConfigError> {
        AppConfig::load(options).map(bootstrap_with_config)
    }

    #[test]
    fn bootstrap_fails_fast_when_selected_provider_is_incomplete() {
        let result = bootstrap(LoadOptions {
            config_path: Some("relay-missing-for-test.toml".into()),
            overrides: ConfigOverrides {
                provider_kind: Some(ProviderKind::Azure),
                provider_endpoint: Some("https://example.openai.azure.com".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let message = result.err().expect("incomplete provider is fatal").to_string();
        assert!(message.contains("provider.api_key"));
    }

    #[test]
    fn bootstrap_resolves_provider_from_overrides() {
        let app = bootstrap(LoadOptions {
            config_path: Some("relay-missing-for-test.toml".into()),
            overrides: ConfigOverrides {
                provider_endpoint: Some("https://example.openai.azure.com".to_string()),
                provider_api_key: Some("azure-key".to_string()),
                model: Some("gpt-5-mini".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("bootstrap succeeds");

        let provider = app.runtime.config().provider().expect("provider resolved");
        assert_eq!(provider.endpoint_url, "https://example.openai.azure.com");
        assert_eq!(app.runtime.config().model_id(), "gpt-5-mini");
    }
}
