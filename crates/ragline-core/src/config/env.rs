use std::path::PathBuf;
use std::str::FromStr;

use super::{Config, ProviderKind, StoreBackend};

/// Parse `var` into `T`, warning and returning `None` on a bad value.
fn parsed<T: FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid {var} value: {raw}");
            None
        }
    }
}

/// Parse a lowercase serde enum such as [`ProviderKind`].
fn parsed_enum<T: serde::de::DeserializeOwned>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    let value = serde_json::Value::String(raw.trim().to_lowercase());
    if let Ok(kind) = serde_json::from_value(value) {
        Some(kind)
    } else {
        tracing::warn!("ignoring invalid {var} value: {raw}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_models();
        self.apply_env_overrides_storage();
    }

    fn apply_env_overrides_models(&mut self) {
        if let Some(kind) = parsed_enum::<ProviderKind>("RAGLINE_LLM_PROVIDER") {
            self.llm.provider = kind;
        }
        if let Ok(v) = std::env::var("RAGLINE_LLM_BASE_URL") {
            self.llm.base_url = v;
        } else if let Ok(v) = std::env::var("OPENAI_API_BASE")
            && !v.trim().is_empty()
        {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("RAGLINE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(t) = parsed::<f32>("RAGLINE_LLM_TEMPERATURE") {
            self.llm.temperature = t;
        }
        if let Ok(v) = std::env::var("RAGLINE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("RAGLINE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
    }

    fn apply_env_overrides_storage(&mut self) {
        if let Some(backend) = parsed_enum::<StoreBackend>("RAGLINE_STORE_BACKEND") {
            self.store.backend = backend;
        }
        if let Ok(v) = std::env::var("RAGLINE_QDRANT_URL") {
            self.store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("RAGLINE_STORE_PERSIST_PATH") {
            self.store.persist_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("RAGLINE_COLLECTION") {
            self.index.collection = v;
        }
        if let Some(n) = parsed::<usize>("RAGLINE_CHUNK_SIZE") {
            self.index.chunk_size = n;
        }
        if let Some(n) = parsed::<usize>("RAGLINE_CHUNK_OVERLAP") {
            self.index.chunk_overlap = n;
        }
        if let Some(k) = parsed::<usize>("RAGLINE_TOP_K") {
            self.query.top_k = k;
        }
    }
}
