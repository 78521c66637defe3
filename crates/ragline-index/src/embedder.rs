use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use ragline_llm::{LlmError, LlmProvider};

use crate::cancel::CallGuard;
use crate::error::RagError;

pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Turns texts into vectors through an embedding-capable provider.
///
/// Inputs are cut into batches of `batch_size`; up to `concurrency` batch
/// requests are in flight at once and their vectors are reassembled in input
/// order, so batching never changes the output.
pub struct Embedder<P> {
    provider: Arc<P>,
    batch_size: usize,
    concurrency: usize,
    guard: CallGuard,
}

impl<P> Clone for Embedder<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            guard: self.guard.clone(),
        }
    }
}

impl<P> std::fmt::Debug for Embedder<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("batch_size", &self.batch_size)
            .field("concurrency", &self.concurrency)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> Embedder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            guard: CallGuard::default(),
        }
    }

    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if either value is zero.
    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Result<Self, RagError> {
        if batch_size == 0 || concurrency == 0 {
            return Err(RagError::InvalidConfiguration(format!(
                "embedding batch_size ({batch_size}) and concurrency ({concurrency}) must be positive"
            )));
        }
        self.batch_size = batch_size;
        self.concurrency = concurrency;
        Ok(self)
    }

    #[must_use]
    pub fn with_guard(mut self, guard: CallGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Identity of the underlying embedding model.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.provider.embedding_model()
    }

    /// Embed `texts`, one vector per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingService`] on provider failure or when a
    /// batch comes back with the wrong number of vectors, and
    /// [`RagError::Cancelled`] / [`RagError::Timeout`] from the call guard.
    /// On any error every vector computed so far is discarded.
    pub async fn embed<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<&str>> = texts
            .chunks(self.batch_size)
            .map(|c| c.iter().map(AsRef::as_ref).collect())
            .collect();
        let batch_count = batches.len();

        let per_batch: Vec<Vec<Vec<f32>>> = stream::iter(batches.iter().enumerate())
            .map(|(i, batch)| self.embed_batch(i, batch))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        tracing::debug!(
            texts = texts.len(),
            batches = batch_count,
            model = self.model().unwrap_or("unknown"),
            "embedded texts"
        );
        Ok(per_batch.into_iter().flatten().collect())
    }

    /// # Errors
    ///
    /// Same as [`Embedder::embed`].
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or(RagError::EmbeddingService(LlmError::EmptyResponse {
                provider: "embedder",
            }))
    }

    async fn embed_batch(&self, index: usize, batch: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let vectors = self
            .guard
            .run("embedding request", async {
                self.provider.embed_batch(batch).await.map_err(|e| {
                    tracing::error!(batch = index, provider = self.provider.name(), "embedding failed: {e}");
                    RagError::EmbeddingService(e)
                })
            })
            .await?;

        if vectors.len() != batch.len() {
            tracing::error!(
                batch = index,
                expected = batch.len(),
                received = vectors.len(),
                "embedding count mismatch"
            );
            return Err(RagError::EmbeddingService(LlmError::Malformed {
                provider: "embedder",
                detail: format!(
                    "batch {index}: expected {} vectors, received {}",
                    batch.len(),
                    vectors.len()
                ),
            }));
        }
        Ok(vectors)
    }
}
