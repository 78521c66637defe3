use std::io::Write;
use std::path::{Path, PathBuf};

use serial_test::serial;

use super::*;
use crate::vault::MockVaultProvider;

const ENV_KEYS: [&str; 15] = [
    "RAGLINE_LLM_PROVIDER",
    "RAGLINE_LLM_BASE_URL",
    "OPENAI_API_BASE",
    "RAGLINE_LLM_MODEL",
    "RAGLINE_LLM_TEMPERATURE",
    "RAGLINE_EMBEDDING_MODEL",
    "RAGLINE_EMBEDDING_BASE_URL",
    "RAGLINE_STORE_BACKEND",
    "RAGLINE_QDRANT_URL",
    "RAGLINE_STORE_PERSIST_PATH",
    "RAGLINE_COLLECTION",
    "RAGLINE_CHUNK_SIZE",
    "RAGLINE_CHUNK_OVERLAP",
    "RAGLINE_TOP_K",
    "RAGLINE_CONFIG",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_match_demo_setup() {
    let config = Config::default();
    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert!((config.llm.temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(config.embedding.model, "text-embedding-3-large");
    assert!(config.embedding.base_url.is_none());
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(
        config.store.snapshot_path(),
        Some(Path::new("ragline-store.json"))
    );
    assert_eq!(config.index.collection, "agentic-ai-notes");
    assert_eq!(
        config.index.collection_description,
        "Agentic AI training snippets"
    );
    assert_eq!(config.index.chunk_size, 400);
    assert_eq!(config.index.chunk_overlap, 50);
    assert_eq!(config.query.top_k, 4);
    assert!(config.query.system_instruction.contains("If unsure"));
    assert!(config.secrets.openai_api_key.is_none());
    config.validate().unwrap();
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/ragline.toml")).unwrap();
    assert_eq!(config.index.chunk_size, 400);
    assert_eq!(config.llm.model, "gpt-4o-mini");
}

#[test]
#[serial]
fn load_partial_file_fills_defaults() {
    clear_env();
    let file = write_config(
        r#"
[llm]
provider = "ollama"
base_url = "http://localhost:11434"
model = "llama3.2"

[index]
chunk_size = 200
chunk_overlap = 20

[store]
backend = "qdrant"
qdrant_url = "http://qdrant:6334"
"#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.llm.model, "llama3.2");
    assert_eq!(config.llm.max_tokens, 1024);
    assert_eq!(config.index.chunk_size, 200);
    assert_eq!(config.index.chunk_overlap, 20);
    assert_eq!(config.index.collection, "agentic-ai-notes");
    assert_eq!(config.store.backend, StoreBackend::Qdrant);
    assert_eq!(config.store.qdrant_url, "http://qdrant:6334");
    assert_eq!(config.query.top_k, 4);
}

#[test]
#[serial]
fn load_rejects_malformed_toml() {
    clear_env();
    let file = write_config("[index\nchunk_size = ");
    let err = Config::load(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
#[serial]
fn load_rejects_unknown_provider() {
    clear_env();
    let file = write_config("[llm]\nprovider = \"claude\"\n");
    assert!(Config::load(file.path()).is_err());
}

#[test]
#[serial]
fn env_overrides_take_precedence_over_file() {
    clear_env();
    let file = write_config("[index]\ncollection = \"from-file\"\nchunk_size = 100\n");
    unsafe {
        std::env::set_var("RAGLINE_COLLECTION", "from-env");
        std::env::set_var("RAGLINE_CHUNK_SIZE", "300");
        std::env::set_var("RAGLINE_TOP_K", "8");
        std::env::set_var("RAGLINE_LLM_PROVIDER", "Ollama");
        std::env::set_var("RAGLINE_STORE_BACKEND", "qdrant");
        std::env::set_var("RAGLINE_LLM_TEMPERATURE", "0.7");
        std::env::set_var("RAGLINE_EMBEDDING_BASE_URL", "http://embed:8080/v1");
        std::env::set_var("RAGLINE_STORE_PERSIST_PATH", "/tmp/snap.json");
    }
    let config = Config::load(file.path()).unwrap();
    clear_env();

    assert_eq!(config.index.collection, "from-env");
    assert_eq!(config.index.chunk_size, 300);
    assert_eq!(config.query.top_k, 8);
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.store.backend, StoreBackend::Qdrant);
    assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(
        config.embedding.effective_base_url(&config.llm),
        "http://embed:8080/v1"
    );
    assert_eq!(
        config.store.persist_path,
        Some(PathBuf::from("/tmp/snap.json"))
    );
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("RAGLINE_CHUNK_SIZE", "lots");
        std::env::set_var("RAGLINE_TOP_K", "-1");
        std::env::set_var("RAGLINE_LLM_PROVIDER", "gemini");
    }
    let config = Config::load(Path::new("/nonexistent")).unwrap();
    clear_env();

    assert_eq!(config.index.chunk_size, 400);
    assert_eq!(config.query.top_k, 4);
    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
}

#[test]
#[serial]
fn openai_api_base_is_fallback_for_base_url() {
    clear_env();
    unsafe { std::env::set_var("OPENAI_API_BASE", "https://openrouter.ai/api/v1") };
    let config = Config::load(Path::new("/nonexistent")).unwrap();
    assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");

    unsafe { std::env::set_var("RAGLINE_LLM_BASE_URL", "http://gateway/v1") };
    let config = Config::load(Path::new("/nonexistent")).unwrap();
    clear_env();
    assert_eq!(config.llm.base_url, "http://gateway/v1");
}

#[test]
fn embedding_base_url_falls_back_to_llm() {
    let config = Config::default();
    assert_eq!(
        config.embedding.effective_base_url(&config.llm),
        "https://api.openai.com/v1"
    );
}

#[test]
fn empty_persist_path_disables_snapshot() {
    let mut config = Config::default();
    config.store.persist_path = Some(PathBuf::new());
    assert!(config.store.snapshot_path().is_none());
    config.store.persist_path = None;
    assert!(config.store.snapshot_path().is_none());
}

#[test]
fn validate_rejects_bad_chunking() {
    let mut config = Config::default();
    config.index.chunk_size = 0;
    assert_eq!(config.validate().unwrap_err().field, "index.chunk_size");

    config.index.chunk_size = 50;
    config.index.chunk_overlap = 50;
    assert_eq!(config.validate().unwrap_err().field, "index.chunk_overlap");
}

#[test]
fn validate_rejects_zero_counts() {
    let mut config = Config::default();
    config.query.top_k = 0;
    assert_eq!(config.validate().unwrap_err().field, "query.top_k");

    let mut config = Config::default();
    config.embedding.batch_size = 0;
    assert_eq!(config.validate().unwrap_err().field, "embedding.batch_size");

    let mut config = Config::default();
    config.embedding.concurrency = 0;
    assert_eq!(config.validate().unwrap_err().field, "embedding.concurrency");
}

#[test]
fn validate_rejects_out_of_range_temperature() {
    let mut config = Config::default();
    config.llm.temperature = 2.5;
    let err = config.validate().unwrap_err();
    assert_eq!(err.field, "llm.temperature");
    assert!(err.to_string().contains("2.5"));
}

#[test]
fn validate_rejects_blank_collection() {
    let mut config = Config::default();
    config.index.collection = "  ".into();
    assert_eq!(config.validate().unwrap_err().field, "index.collection");
}

#[tokio::test]
async fn resolve_secrets_prefers_ragline_key() {
    let vault = MockVaultProvider::default()
        .with_secret("RAGLINE_OPENAI_API_KEY", "sk-ragline")
        .with_secret("OPENAI_API_KEY", "sk-plain");
    let mut config = Config::default();
    config.resolve_secrets(&vault).await.unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-ragline")
    );
}

#[tokio::test]
async fn resolve_secrets_falls_back_to_openai_key() {
    let vault = MockVaultProvider::default().with_secret("OPENAI_API_KEY", "sk-plain");
    let mut config = Config::default();
    config.resolve_secrets(&vault).await.unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-plain")
    );
}

#[tokio::test]
async fn resolve_secrets_leaves_key_unset_when_missing() {
    let mut config = Config::default();
    config
        .resolve_secrets(&MockVaultProvider::default())
        .await
        .unwrap();
    assert!(config.secrets.openai_api_key.is_none());
}

#[test]
fn secrets_are_not_serialized() {
    let mut config = Config::default();
    config.secrets.openai_api_key = Some(Secret::new("sk-hidden"));
    let toml = toml::to_string(&config).unwrap();
    assert!(!toml.contains("sk-hidden"));
    assert!(format!("{config:?}").contains("[REDACTED]"));
}

#[test]
fn shipped_default_toml_matches_defaults() {
    let shipped: Config = toml::from_str(include_str!("../../../../config/default.toml")).unwrap();
    let defaults = Config::default();
    assert_eq!(shipped.llm.provider, defaults.llm.provider);
    assert_eq!(shipped.llm.model, defaults.llm.model);
    assert_eq!(shipped.embedding.model, defaults.embedding.model);
    assert_eq!(shipped.store.snapshot_path(), defaults.store.snapshot_path());
    assert_eq!(shipped.index.chunk_size, defaults.index.chunk_size);
    assert_eq!(shipped.index.chunk_overlap, defaults.index.chunk_overlap);
    assert_eq!(shipped.query.top_k, defaults.query.top_k);
    assert_eq!(
        shipped.query.system_instruction,
        defaults.query.system_instruction
    );
    assert_eq!(shipped.timeouts.llm_seconds, defaults.timeouts.llm_seconds);
    shipped.validate().unwrap();
}
