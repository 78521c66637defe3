//! Query embedding plus nearest-neighbour lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ragline_llm::LlmProvider;

use crate::cancel::CallGuard;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::vector_store::{CollectionHandle, RetrievalResult, VectorStore};

/// Cached query vectors keyed on `(embedding model, exact query text)`, so a
/// model change never serves a stale vector.
#[derive(Debug)]
struct QueryCache {
    capacity: usize,
    entries: Mutex<HashMap<(String, String), Vec<f32>>>,
}

impl QueryCache {
    fn get(&self, model: &str, query: &str) -> Option<Vec<f32>> {
        let entries = self.entries.lock().ok()?;
        entries.get(&(model.to_owned(), query.to_owned())).cloned()
    }

    fn put(&self, model: &str, query: &str, vector: Vec<f32>) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity {
                entries.clear();
            }
            entries.insert((model.to_owned(), query.to_owned()), vector);
        }
    }
}

pub struct Retriever<P> {
    embedder: Embedder<P>,
    store: Arc<dyn VectorStore>,
    cache: Option<QueryCache>,
    guard: CallGuard,
}

impl<P: LlmProvider> Retriever<P> {
    #[must_use]
    pub fn new(embedder: Embedder<P>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            cache: None,
            guard: CallGuard::default(),
        }
    }

    /// Keep up to `capacity` query vectors in memory. Zero disables caching.
    #[must_use]
    pub fn with_query_cache(mut self, capacity: usize) -> Self {
        self.cache = (capacity > 0).then(|| QueryCache {
            capacity,
            entries: Mutex::new(HashMap::new()),
        });
        self
    }

    /// Guard applied to vector store lookups.
    #[must_use]
    pub fn with_guard(mut self, guard: CallGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Embed `query` and return up to `k` nearest records from `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for a blank query or `k == 0`,
    /// [`RagError::DimensionMismatch`] when the query vector does not fit the
    /// collection, and embedding or store failures unchanged.
    pub async fn retrieve(
        &self,
        collection: &CollectionHandle,
        query: &str,
        k: usize,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".into()));
        }
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "k must be greater than zero".into(),
            ));
        }

        let vector = self.query_vector(query).await?;
        let results = self
            .guard
            .run("vector store query", async {
                self.store
                    .query(collection, &vector, k)
                    .await
                    .map_err(RagError::from)
            })
            .await?;

        tracing::debug!(
            collection = %collection.name,
            k,
            hits = results.len(),
            "retrieved context"
        );
        Ok(results)
    }

    async fn query_vector(&self, query: &str) -> Result<Vec<f32>> {
        let model = self.embedder.model().unwrap_or_default();
        if let Some(cache) = &self.cache
            && let Some(vector) = cache.get(model, query)
        {
            tracing::debug!("query embedding cache hit");
            return Ok(vector);
        }

        let vector = self.embedder.embed_one(query).await?;
        if let Some(cache) = &self.cache {
            cache.put(model, query, vector.clone());
        }
        Ok(vector)
    }
}
