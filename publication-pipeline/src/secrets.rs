use async_trait::async_trait;
use interfaces::{CapabilityError, SecretStore};

use crate::types::{PipelineError, Result};

/// Secrets read from the process environment, optionally namespaced by a
/// prefix (`PIPELINE_` + key).
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }

    fn variable(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, key: &str) -> std::result::Result<Vec<u8>, CapabilityError> {
        let variable = self.variable(key);
        match std::env::var(&variable) {
            Ok(value) if !value.is_empty() => Ok(value.into_bytes()),
            Ok(_) | Err(std::env::VarError::NotPresent) => Err(CapabilityError::not_found("environment", variable)),
            Err(e) => Err(CapabilityError::unavailable("environment", e.to_string())),
        }
    }

    async fn put(&self, _key: &str, _value: &[u8]) -> std::result::Result<(), CapabilityError> {
        Err(CapabilityError::unavailable("environment", "secrets cannot be written to the environment"))
    }
}

/// Resolve a secret needed at startup. A missing secret is a configuration
/// error, not a transient one.
pub async fn require_secret(store: &dyn SecretStore, key: &str) -> Result<String> {
    store
        .get_string(key)
        .await
        .map_err(|e| PipelineError::Config(format!("required secret {} is not available: {}", key, e)))
}
