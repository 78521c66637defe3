use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::vault::Secret;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Model backend used for both chat and embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or any OpenAI-compatible `/v1` gateway.
    #[default]
    OpenAi,
    Ollama,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, optionally snapshotted to `persist_path`.
    #[default]
    Memory,
    Qdrant,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".into()
}

fn default_batch_size() -> usize {
    64
}

fn default_concurrency() -> usize {
    4
}

fn default_query_cache_size() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Endpoint for embedding requests; `llm.base_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Query vectors kept in memory; 0 disables the cache.
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
}

impl EmbeddingConfig {
    #[must_use]
    pub fn effective_base_url<'a>(&'a self, llm: &'a LlmConfig) -> &'a str {
        self.base_url.as_deref().unwrap_or(&llm.base_url)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            base_url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            query_cache_size: default_query_cache_size(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_persist_path() -> Option<PathBuf> {
    Some(PathBuf::from("ragline-store.json"))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    /// Snapshot file of the memory backend. An empty path keeps the store in
    /// process only.
    #[serde(default = "default_persist_path")]
    pub persist_path: Option<PathBuf>,
}

impl StoreConfig {
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&std::path::Path> {
        self.persist_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            qdrant_url: default_qdrant_url(),
            persist_path: default_persist_path(),
        }
    }
}

fn default_collection() -> String {
    "agentic-ai-notes".into()
}

fn default_collection_description() -> String {
    "Agentic AI training snippets".into()
}

fn default_chunk_size() -> usize {
    400
}

fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_collection_description")]
    pub collection_description: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            collection_description: default_collection_description(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

fn default_system_instruction() -> String {
    "You are a concise assistant for an agentic AI training module. \
     Use the provided context to answer the question. \
     If unsure, say you are not sure."
        .into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            system_instruction: default_system_instruction(),
        }
    }
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_store_timeout() -> u64 {
    30
}

/// Per-call deadlines in seconds. Zero disables the deadline.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_seconds: u64,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_seconds: u64,
    #[serde(default = "default_store_timeout")]
    pub store_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_seconds: default_llm_timeout(),
            embedding_seconds: default_embedding_timeout(),
            store_seconds: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
}

/// A configuration value outside its allowed range.
#[derive(Debug, thiserror::Error)]
#[error("invalid config value for {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
