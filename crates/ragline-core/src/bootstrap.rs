//! Application bootstrap: config resolution, provider, store, and pipeline construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use ragline_index::{
    CallGuard, Chunker, CollectionHandle, Document, Embedder, Generator, InMemoryVectorStore,
    IndexingPipeline, Metadata, MetadataValue, QdrantOps, QueryPipeline, RagError, Retriever,
    VectorStore,
};
use ragline_llm::LlmProvider;
use ragline_llm::any::AnyProvider;
use ragline_llm::ollama::OllamaProvider;
use ragline_llm::openai::OpenAiProvider;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, OPENAI_KEY_VARS, ProviderKind, StoreBackend};
use crate::vault::VaultProvider;

/// Snippets indexed when no files are given.
pub const SAMPLE_CORPUS: [&str; 3] = [
    "Agentic AI systems can autonomously decide which tools to call.",
    "RAG combines retrieval from a vector store with generation from an LLM.",
    "Chroma is an open-source vector database optimized for AI applications.",
];

/// Priority: explicit `--config` > `RAGLINE_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("RAGLINE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Load the config at `path`, apply `overrides`, then validate and resolve
/// secrets. Command-line flags go through `overrides` so they are validated
/// like file and env values.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed, a value is out of range, or
/// the vault fails.
pub async fn load_config(
    path: &Path,
    vault: &dyn VaultProvider,
    overrides: impl FnOnce(&mut Config),
) -> anyhow::Result<Config> {
    let mut config = Config::load(path)?;
    overrides(&mut config);
    config.validate()?;
    config.resolve_secrets(vault).await?;
    Ok(config)
}

#[must_use]
pub fn sample_corpus() -> Vec<Document> {
    SAMPLE_CORPUS
        .iter()
        .map(|text| Document::new(*text).with_metadata("source", "sample"))
        .collect()
}

fn openai_key(config: &Config) -> anyhow::Result<String> {
    config
        .secrets
        .openai_api_key
        .as_ref()
        .map(|s| s.expose().to_owned())
        .with_context(|| {
            format!(
                "{} (or {}) not found in vault",
                OPENAI_KEY_VARS[0], OPENAI_KEY_VARS[1]
            )
        })
}

/// Provider for chat completions.
///
/// # Errors
///
/// Returns an error if the OpenAI-compatible backend is selected without an API key.
pub fn create_chat_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    Ok(match llm.provider {
        ProviderKind::OpenAi => AnyProvider::OpenAi(OpenAiProvider::new(
            openai_key(config)?,
            llm.base_url.clone(),
            llm.model.clone(),
            llm.max_tokens,
            llm.temperature,
            None,
        )),
        ProviderKind::Ollama => AnyProvider::Ollama(OllamaProvider::new(
            &llm.base_url,
            llm.model.clone(),
            config.embedding.model.clone(),
            llm.temperature,
        )),
    })
}

/// Provider for embeddings, pointed at `embedding.base_url` when set.
///
/// # Errors
///
/// Returns an error if the OpenAI-compatible backend is selected without an API key.
pub fn create_embedding_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    let base_url = config.embedding.effective_base_url(llm);
    Ok(match llm.provider {
        ProviderKind::OpenAi => AnyProvider::OpenAi(OpenAiProvider::new(
            openai_key(config)?,
            base_url.to_owned(),
            llm.model.clone(),
            llm.max_tokens,
            llm.temperature,
            Some(config.embedding.model.clone()),
        )),
        ProviderKind::Ollama => AnyProvider::Ollama(OllamaProvider::new(
            base_url,
            llm.model.clone(),
            config.embedding.model.clone(),
            llm.temperature,
        )),
    })
}

/// Open the configured vector store.
///
/// # Errors
///
/// Returns an error if the snapshot file is unreadable or the Qdrant URL is invalid.
pub async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.store.backend {
        StoreBackend::Memory => match config.store.snapshot_path() {
            Some(path) => {
                let store = InMemoryVectorStore::open(path)
                    .await
                    .context("failed to open vector store snapshot")?;
                tracing::info!(path = %path.display(), "using persisted in-memory vector store");
                Ok(Arc::new(store))
            }
            None => {
                tracing::info!("using in-process vector store without persistence");
                Ok(Arc::new(InMemoryVectorStore::new()))
            }
        },
        StoreBackend::Qdrant => {
            let url = &config.store.qdrant_url;
            if url.trim().is_empty() {
                bail!("store.qdrant_url must be set for the qdrant backend");
            }
            let ops = QdrantOps::new(url).context("failed to create Qdrant client")?;
            tracing::info!(url, "using Qdrant vector store");
            Ok(Arc::new(ops))
        }
    }
}

/// Log whether a local Ollama server answers; other providers are not probed.
pub async fn health_check(provider: &AnyProvider) {
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        }
    }
}

fn deadline(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Everything a command needs, built once from a [`Config`].
pub struct App {
    config: Config,
    embedding: Arc<AnyProvider>,
    chat: Arc<AnyProvider>,
    store: Arc<dyn VectorStore>,
    collection: CollectionHandle,
    token: CancellationToken,
}

impl App {
    /// Build providers and store from `config` and open the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider lacks credentials or the store cannot be opened.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let embedding = create_embedding_provider(&config)?;
        let chat = create_chat_provider(&config)?;
        let store = create_store(&config).await?;
        Self::from_parts(config, embedding, chat, store).await
    }

    /// Assemble from pre-built parts. Opening the collection is bounded by
    /// `timeouts.store_seconds`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be opened in time.
    pub async fn from_parts(
        config: Config,
        embedding: AnyProvider,
        chat: AnyProvider,
        store: Arc<dyn VectorStore>,
    ) -> anyhow::Result<Self> {
        let metadata = Metadata::from([(
            "description".to_owned(),
            MetadataValue::from(config.index.collection_description.as_str()),
        )]);
        let token = CancellationToken::new();
        let collection = CallGuard::new(token.clone())
            .with_timeout(deadline(config.timeouts.store_seconds))
            .run("vector store open", async {
                store
                    .get_or_create_collection(&config.index.collection, metadata)
                    .await
                    .map_err(RagError::from)
            })
            .await
            .with_context(|| format!("failed to open collection {}", config.index.collection))?;
        tracing::debug!(
            collection = %collection.name,
            embedding = embedding.name(),
            chat = chat.name(),
            "bootstrap complete"
        );
        Ok(Self {
            config,
            embedding: Arc::new(embedding),
            chat: Arc::new(chat),
            store,
            collection,
            token,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    #[must_use]
    pub fn chat_provider(&self) -> &AnyProvider {
        &self.chat
    }

    /// Token shared by every guard this app hands out; cancel it to stop all
    /// calls in flight.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn guard(&self, seconds: u64) -> CallGuard {
        CallGuard::new(self.token.clone()).with_timeout(deadline(seconds))
    }

    fn embedder(&self) -> anyhow::Result<Embedder<AnyProvider>> {
        let cfg = &self.config.embedding;
        Ok(Embedder::new(Arc::clone(&self.embedding))
            .with_batching(cfg.batch_size, cfg.concurrency)?
            .with_guard(self.guard(self.config.timeouts.embedding_seconds)))
    }

    /// # Errors
    ///
    /// Returns an error if chunking or batching parameters are invalid.
    pub fn indexing_pipeline(&self) -> anyhow::Result<IndexingPipeline<AnyProvider>> {
        let chunker = Chunker::new(self.config.index.chunk_size, self.config.index.chunk_overlap)?;
        Ok(IndexingPipeline::new(
            chunker,
            self.embedder()?,
            Arc::clone(&self.store),
            self.collection.clone(),
        )
        .with_guard(self.guard(self.config.timeouts.store_seconds)))
    }

    /// # Errors
    ///
    /// Returns an error if batching parameters are invalid.
    pub fn query_pipeline(&self) -> anyhow::Result<QueryPipeline<AnyProvider, AnyProvider>> {
        let retriever = Retriever::new(self.embedder()?, Arc::clone(&self.store))
            .with_query_cache(self.config.embedding.query_cache_size)
            .with_guard(self.guard(self.config.timeouts.store_seconds));
        let generator = Generator::new(Arc::clone(&self.chat))
            .with_guard(self.guard(self.config.timeouts.llm_seconds));
        Ok(QueryPipeline::new(
            retriever,
            generator,
            self.collection.clone(),
            self.config.query.top_k,
            self.config.query.system_instruction.clone(),
        ))
    }
}
