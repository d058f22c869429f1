//! Shared configuration, domain types and error taxonomy for relay.

pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::agent::{AgentConfig, ProviderConfig, ProviderKind};
pub use errors::{ApplicationError, InterfaceError, NO_RESPONSE};
