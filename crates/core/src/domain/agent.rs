use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Alternate model provider selected by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure OpenAI: deployment-scoped URL, `api-key` header, `api-version` query.
    Azure,
    /// Any OpenAI-compatible endpoint using bearer authentication.
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAi => "openai",
        }
    }
}

/// Endpoint and credential for the provider that runs the model.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint_url: String,
    pub credential: SecretString,
    pub api_version: String,
}

/// Everything a backend needs to open a session.
///
/// Built once by [`crate::config::AppConfig::agent_config`] and never mutated
/// afterwards; callers share it by reference or behind an `Arc`.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    name: String,
    system_instruction: String,
    model_id: String,
    provider: Option<ProviderConfig>,
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        system_instruction: impl Into<String>,
        model_id: impl Into<String>,
        provider: Option<ProviderConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            system_instruction: system_instruction.into(),
            model_id: model_id.into(),
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// `None` means the backend's own default provider is used.
    pub fn provider(&self) -> Option<&ProviderConfig> {
        self.provider.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{AgentConfig, ProviderConfig, ProviderKind};

    #[test]
    fn debug_output_redacts_provider_credential() {
        let config = AgentConfig::new(
            "RobotAgent",
            "be brief",
            "gpt-5-mini",
            Some(ProviderConfig {
                kind: ProviderKind::Azure,
                endpoint_url: "https://example.openai.azure.com".to_string(),
                credential: SecretString::from("azure-key-material".to_string()),
                api_version: "2024-10-21".to_string(),
            }),
        );

        let debug = format!("{config:?}");
        assert!(!debug.contains("azure-key-material"));
        assert!(debug.contains("https://example.openai.azure.com"));
    }

    #[test]
    fn provider_kind_names_are_lowercase() {
        assert_eq!(ProviderKind::Azure.as_str(), "azure");
        assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
    }
}
