//! Test-only mock LLM provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::provider::{LlmProvider, Message};

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<Vec<Message>>>>,
    embed_calls: Arc<AtomicUsize>,
    pub default_response: String,
    /// Returned by `embed` when no vocabulary is set.
    pub embedding: Vec<f32>,
    /// Keyword vocabulary; when non-empty, each vector component counts one keyword.
    pub vocabulary: Vec<String>,
    pub embedding_model: String,
    pub supports_embeddings: bool,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            embedding: vec![0.0; 384],
            vocabulary: Vec::new(),
            embedding_model: "mock-embed".into(),
            supports_embeddings: true,
            fail_chat: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    /// Embeds texts by keyword counts, so texts sharing words land close together.
    #[must_use]
    pub fn with_vocabulary(words: &[&str]) -> Self {
        Self {
            vocabulary: words.iter().map(|w| w.to_lowercase()).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self.vocabulary.clear();
        self
    }

    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Message lists passed to `chat`, oldest first.
    #[must_use]
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().unwrap().clone()
    }

    /// Number of texts embedded so far.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    #[allow(clippy::cast_precision_loss)]
    fn vector_for(&self, text: &str) -> Vec<f32> {
        if self.vocabulary.is_empty() {
            return self.embedding.clone();
        }
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|w| lower.matches(w.as_str()).count() as f32)
            .collect();
        // Keeps keyword-free texts away from the zero vector.
        v.push(0.01);
        v
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, crate::LlmError> {
        self.pause().await;
        self.received.lock().unwrap().push(messages.to_vec());
        if self.fail_chat {
            return Err(crate::LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::LlmError> {
        self.pause().await;
        if !self.supports_embeddings {
            return Err(crate::LlmError::EmbedUnsupported { provider: "mock" });
        }
        if self.fail_embed {
            return Err(crate::LlmError::Other("mock embedding error".into()));
        }
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    fn embedding_model(&self) -> Option<&str> {
        self.supports_embeddings
            .then_some(self.embedding_model.as_str())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
