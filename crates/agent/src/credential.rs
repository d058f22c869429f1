use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential source `{source_name}` produced no value: {reason}")]
    Unavailable { source_name: String, reason: String },
}

/// Produces the bearer token or key presented to the backend, on demand.
///
/// Called once per session open so rotating sources are picked up between sessions.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credential(&self) -> Result<SecretString, CredentialError>;
}

/// A credential resolved once from configuration.
#[derive(Clone, Debug)]
pub struct StaticCredential {
    secret: SecretString,
}

impl StaticCredential {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn get_credential(&self) -> Result<SecretString, CredentialError> {
        Ok(self.secret.clone())
    }
}

/// Reads an environment variable on every call, so a rotated key is used by the
/// next session without a restart.
#[derive(Clone, Debug)]
pub struct EnvCredential {
    var_name: String,
}

impl EnvCredential {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self { var_name: var_name.into() }
    }

    pub fn is_set(&self) -> bool {
        std::env::var(&self.var_name).is_ok_and(|value| !value.trim().is_empty())
    }
}

#[async_trait]
impl CredentialProvider for EnvCredential {
    async fn get_credential(&self) -> Result<SecretString, CredentialError> {
        match std::env::var(&self.var_name) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(SecretString::from(value.trim().to_string()))
            }
            Ok(_) => Err(CredentialError::Unavailable {
                source_name: self.var_name.clone(),
                reason: "variable is blank".to_string(),
            }),
            Err(error) => Err(CredentialError::Unavailable {
                source_name: self.var_name.clone(),
                reason: error.to_string(),
            }),
        }
    }
}

/// Tries each provider in order and returns the first credential produced.
#[derive(Clone, Default)]
pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl CredentialProvider for CredentialChain {
    async fn get_credential(&self) -> Result<SecretString, CredentialError> {
        let mut last_error = CredentialError::Unavailable {
            source_name: "chain".to_string(),
            reason: "no credential sources configured".to_string(),
        };
        for provider in &self.providers {
            match provider.get_credential().await {
                Ok(secret) => return Ok(secret),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};

    use super::{
        CredentialChain, CredentialError, CredentialProvider, EnvCredential, StaticCredential,
    };

    #[tokio::test]
    async fn static_credential_returns_configured_secret() {
        let provider = StaticCredential::new(SecretString::from("backend-key".to_string()));

        let secret = provider.get_credential().await.expect("static credential never fails");
        assert_eq!(secret.expose_secret(), "backend-key");
        assert!(!format!("{provider:?}").contains("backend-key"));
    }

    #[tokio::test]
    async fn env_credential_reports_missing_variable() {
        let provider = EnvCredential::new("RELAY_TEST_CREDENTIAL_NEVER_SET");

        assert!(!provider.is_set());
        let error = provider.get_credential().await.expect_err("variable is unset");
        assert!(matches!(
            error,
            CredentialError::Unavailable { ref source_name, .. }
                if source_name == "RELAY_TEST_CREDENTIAL_NEVER_SET"
        ));
    }

    #[tokio::test]
    async fn chain_falls_through_to_first_available_source() {
        let chain = CredentialChain::new()
            .with(EnvCredential::new("RELAY_TEST_CREDENTIAL_NEVER_SET"))
            .with(StaticCredential::new(SecretString::from("fallback-key".to_string())));

        let secret = chain.get_credential().await.expect("static source answers");
        assert_eq!(secret.expose_secret(), "fallback-key");
    }

    #[tokio::test]
    async fn empty_chain_is_unavailable() {
        let chain = CredentialChain::new();

        assert!(chain.is_empty());
        assert!(chain.get_credential().await.is_err());
    }
}
