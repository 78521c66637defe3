mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::Context;

use crate::vault::{Secret, VaultProvider};

/// Vault keys tried in order for the OpenAI-compatible API key.
pub const OPENAI_KEY_VARS: [&str; 2] = ["RAGLINE_OPENAI_API_KEY", "OPENAI_API_KEY"];

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Check numeric ranges that would otherwise fail deep inside a pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.chunk_size == 0 {
            return Err(ConfigError::new("index.chunk_size", "must be positive"));
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return Err(ConfigError::new(
                "index.chunk_overlap",
                format!(
                    "{} must be smaller than chunk_size {}",
                    self.index.chunk_overlap, self.index.chunk_size
                ),
            ));
        }
        if self.index.collection.trim().is_empty() {
            return Err(ConfigError::new("index.collection", "must not be empty"));
        }
        if self.query.top_k == 0 {
            return Err(ConfigError::new("query.top_k", "must be positive"));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::new("embedding.batch_size", "must be positive"));
        }
        if self.embedding.concurrency == 0 {
            return Err(ConfigError::new("embedding.concurrency", "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::new(
                "llm.temperature",
                format!("{} is outside 0.0..=2.0", self.llm.temperature),
            ));
        }
        Ok(())
    }

    /// Resolve credentials through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        for key in OPENAI_KEY_VARS {
            if let Some(val) = vault.get_secret(key).await? {
                tracing::debug!("openai api key resolved from {key}");
                self.secrets.openai_api_key = Some(Secret::new(val));
                break;
            }
        }
        Ok(())
    }
}
