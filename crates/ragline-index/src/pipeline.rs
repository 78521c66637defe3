use std::path::Path;
use std::sync::Arc;

use ragline_llm::LlmProvider;

use crate::cancel::CallGuard;
use crate::document::{Chunk, Chunker, Document, DocumentLoader, MetadataValue};
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::generator::{AnswerResponse, Generator};
use crate::retriever::Retriever;
use crate::vector_store::{CollectionHandle, RecordBatch, VectorStore};

/// Outcome of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    /// Records in the collection after the run.
    pub total_records: usize,
}

/// Chunk, embed and upsert documents into one collection.
///
/// Record ids are `{document_id}:{chunk_index}`, so re-running over the same
/// documents with the same chunking overwrites instead of duplicating.
pub struct IndexingPipeline<P> {
    chunker: Chunker,
    embedder: Embedder<P>,
    store: Arc<dyn VectorStore>,
    collection: CollectionHandle,
    guard: CallGuard,
}

impl<P: LlmProvider> IndexingPipeline<P> {
    #[must_use]
    pub fn new(
        chunker: Chunker,
        embedder: Embedder<P>,
        store: Arc<dyn VectorStore>,
        collection: CollectionHandle,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            collection,
            guard: CallGuard::default(),
        }
    }

    /// Guard bounding every store call this pipeline makes.
    #[must_use]
    pub fn with_guard(mut self, guard: CallGuard) -> Self {
        self.guard = guard;
        self
    }

    #[must_use]
    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    /// Index every document in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first embedding, store, or cancellation error. Documents
    /// before the failing one stay indexed; the failing one is not written.
    pub async fn run(&self, documents: &[Document]) -> Result<IndexReport> {
        let mut report = IndexReport {
            documents: documents.len(),
            ..IndexReport::default()
        };
        for doc in documents {
            report.chunks += self.index_document(doc).await?;
        }
        report.total_records = self.count().await?;
        tracing::info!(
            collection = %self.collection.name,
            documents = report.documents,
            chunks = report.chunks,
            total = report.total_records,
            "indexing complete"
        );
        Ok(report)
    }

    /// Split, embed and upsert one document. Returns the number of chunks written.
    ///
    /// # Errors
    ///
    /// Returns an error if any chunk fails to embed, the store rejects the
    /// batch, or the write is cancelled or runs past the guard's deadline.
    pub async fn index_document(&self, document: &Document) -> Result<usize> {
        let chunks = self.chunker.split(document);
        if chunks.is_empty() {
            tracing::warn!(document = document.id(), "document is empty, skipping");
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let ids = chunks.iter().map(Chunk::id).collect();
        let metadata = chunks
            .iter()
            .map(|c| {
                let mut m = document.metadata().clone();
                m.insert("document_id".into(), document.id().into());
                m.insert(
                    "chunk_index".into(),
                    MetadataValue::Integer(i64::try_from(c.chunk_index).unwrap_or(i64::MAX)),
                );
                m
            })
            .collect();
        let batch = RecordBatch::new(
            ids,
            chunks.iter().map(|c| c.text.clone()).collect(),
            vectors,
            Some(metadata),
        )?;

        self.guard
            .run("vector store add", async {
                self.store
                    .add(&self.collection, batch)
                    .await
                    .map_err(RagError::from)
            })
            .await?;

        tracing::info!(
            document = document.id(),
            chunks = chunks.len(),
            "indexed document"
        );
        Ok(chunks.len())
    }

    /// Load a file with `loader` and index it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Document`] if loading fails, otherwise as
    /// [`IndexingPipeline::index_document`].
    pub async fn load_and_index(
        &self,
        loader: &(dyn DocumentLoader + '_),
        path: &Path,
    ) -> Result<usize> {
        let document = loader.load(path).await?;
        self.index_document(&document).await
    }

    /// Delete every record in the collection. The collection is recreated
    /// on the next write.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::StoreUnavailable`] if the store cannot be reached.
    pub async fn reset(&self) -> Result<()> {
        self.guard
            .run("vector store reset", async {
                self.store
                    .delete_collection(&self.collection.name)
                    .await
                    .map_err(RagError::from)
            })
            .await
    }

    /// # Errors
    ///
    /// Returns [`RagError::StoreUnavailable`] if the store cannot be reached.
    pub async fn count(&self) -> Result<usize> {
        self.guard
            .run("vector store count", async {
                self.store
                    .count(&self.collection)
                    .await
                    .map_err(RagError::from)
            })
            .await
    }
}

/// Retrieve context for a question and answer it.
pub struct QueryPipeline<E, G> {
    retriever: Retriever<E>,
    generator: Generator<G>,
    collection: CollectionHandle,
    k: usize,
    system_instruction: String,
}

impl<E: LlmProvider, G: LlmProvider> QueryPipeline<E, G> {
    #[must_use]
    pub fn new(
        retriever: Retriever<E>,
        generator: Generator<G>,
        collection: CollectionHandle,
        k: usize,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            generator,
            collection,
            k,
            system_instruction: system_instruction.into(),
        }
    }

    /// # Errors
    ///
    /// Returns retrieval or generation errors unchanged.
    pub async fn run(&self, question: &str) -> Result<AnswerResponse> {
        let context = self
            .retriever
            .retrieve(&self.collection, question, self.k)
            .await?;
        let response = self
            .generator
            .answer(question, context, &self.system_instruction)
            .await?;
        tracing::info!(
            collection = %self.collection.name,
            sources = response.context.len(),
            "question answered"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use ragline_llm::mock::MockProvider;

    use super::*;
    use crate::document::Metadata;
    use crate::in_memory_store::InMemoryVectorStore;
    use crate::vector_store::{BoxFuture, RetrievalResult, VectorStoreError};

    async fn pipeline(
        provider: MockProvider,
        max: usize,
        overlap: usize,
    ) -> (IndexingPipeline<MockProvider>, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let col = store
            .get_or_create_collection("notes", Metadata::new())
            .await
            .unwrap();
        let p = IndexingPipeline::new(
            Chunker::new(max, overlap).unwrap(),
            Embedder::new(Arc::new(provider)),
            Arc::clone(&store) as Arc<dyn VectorStore>,
            col,
        );
        (p, store)
    }

    #[tokio::test]
    async fn records_carry_source_metadata() {
        let (p, store) = pipeline(MockProvider::with_vocabulary(&["sky"]), 8, 2).await;
        let doc = Document::with_id("d1", "the sky is very blue today")
            .with_metadata("source", "x.txt");
        let written = p.index_document(&doc).await.unwrap();
        assert_eq!(written, 4);

        let hits = store.query(p.collection(), &[1.0, 0.01], 10).await.unwrap();
        assert_eq!(hits.len(), 4);
        for hit in &hits {
            assert_eq!(hit.metadata["document_id"].as_str(), Some("d1"));
            assert_eq!(hit.metadata["source"].as_str(), Some("x.txt"));
            assert!(hit.id.starts_with("d1:"));
        }
    }

    #[tokio::test]
    async fn empty_document_writes_nothing() {
        let (p, _store) = pipeline(MockProvider::with_vocabulary(&["a"]), 8, 0).await;
        assert_eq!(p.index_document(&Document::new("")).await.unwrap(), 0);
        assert_eq!(p.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_aborts_document() {
        let (p, _store) = pipeline(MockProvider::failing(), 8, 0).await;
        let err = p.run(&[Document::new("some text")]).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(_)));
        assert_eq!(p.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_write_leaves_store_untouched() {
        let (p, _store) = pipeline(MockProvider::with_vocabulary(&["a"]), 8, 0).await;
        let token = tokio_util::sync::CancellationToken::new();
        let p = p.with_guard(CallGuard::new(token.clone()));
        token.cancel();
        let err = p.index_document(&Document::new("abc")).await.unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
        let fresh = IndexingPipeline::new(
            Chunker::new(8, 0).unwrap(),
            Embedder::new(Arc::new(MockProvider::default())),
            Arc::clone(&p.store),
            p.collection().clone(),
        );
        assert_eq!(fresh.count().await.unwrap(), 0);
    }

    /// Accepts collections but never finishes a write.
    struct StalledStore;

    impl VectorStore for StalledStore {
        fn get_or_create_collection<'a>(
            &'a self,
            name: &'a str,
            metadata: Metadata,
        ) -> BoxFuture<'a, std::result::Result<CollectionHandle, VectorStoreError>> {
            Box::pin(async move {
                Ok(CollectionHandle {
                    name: name.to_owned(),
                    metadata,
                })
            })
        }

        fn add<'a>(
            &'a self,
            _collection: &'a CollectionHandle,
            _batch: RecordBatch,
        ) -> BoxFuture<'a, std::result::Result<(), VectorStoreError>> {
            Box::pin(std::future::pending())
        }

        fn query<'a>(
            &'a self,
            _collection: &'a CollectionHandle,
            _vector: &'a [f32],
            _k: usize,
        ) -> BoxFuture<'a, std::result::Result<RetrievalResult, VectorStoreError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn count<'a>(
            &'a self,
            _collection: &'a CollectionHandle,
        ) -> BoxFuture<'a, std::result::Result<usize, VectorStoreError>> {
            Box::pin(async { Ok(0) })
        }

        fn delete_collection<'a>(
            &'a self,
            _name: &'a str,
        ) -> BoxFuture<'a, std::result::Result<(), VectorStoreError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn stalled_pipeline(guard: CallGuard) -> IndexingPipeline<MockProvider> {
        IndexingPipeline::new(
            Chunker::new(8, 0).unwrap(),
            Embedder::new(Arc::new(MockProvider::with_vocabulary(&["a"]))),
            Arc::new(StalledStore),
            CollectionHandle {
                name: "notes".into(),
                metadata: Metadata::new(),
            },
        )
        .with_guard(guard)
    }

    #[tokio::test]
    async fn stalled_write_hits_store_deadline() {
        let p = stalled_pipeline(
            CallGuard::default().with_timeout(Some(std::time::Duration::from_millis(50))),
        );
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            p.index_document(&Document::new("abc")),
        )
        .await
        .expect("write must be bounded by the guard deadline")
        .unwrap_err();
        assert!(matches!(err, RagError::Timeout("vector store add")));
    }

    #[tokio::test]
    async fn cancel_interrupts_stalled_write() {
        let token = tokio_util::sync::CancellationToken::new();
        let p = stalled_pipeline(CallGuard::new(token.clone()));
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            token.cancel();
        });
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            p.index_document(&Document::new("abc")),
        )
        .await
        .expect("cancel must interrupt the write")
        .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_collection() {
        let (p, _store) = pipeline(MockProvider::with_vocabulary(&["a"]), 8, 0).await;
        p.run(&[Document::new("a a a")]).await.unwrap();
        assert_eq!(p.count().await.unwrap(), 1);
        p.reset().await.unwrap();
        assert_eq!(p.count().await.unwrap(), 0);
        p.run(&[Document::new("a a a")]).await.unwrap();
        assert_eq!(p.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_and_index_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "# Notes\nThe sky is blue.").unwrap();

        let (p, store) = pipeline(MockProvider::with_vocabulary(&["sky"]), 400, 50).await;
        let n = p
            .load_and_index(&crate::document::TextLoader::default(), &file)
            .await
            .unwrap();
        assert_eq!(n, 1);
        let hits = store.query(p.collection(), &[1.0, 0.01], 1).await.unwrap();
        assert_eq!(
            hits[0].metadata["content_type"].as_str(),
            Some("text/markdown")
        );
    }

    #[tokio::test]
    async fn query_pipeline_answers_with_context() {
        let vocab = ["sky", "blue", "grass", "green"];
        let (p, store) = pipeline(MockProvider::with_vocabulary(&vocab), 20, 0).await;
        p.run(&[Document::new("The sky is blue."), Document::new("Grass is green.")])
            .await
            .unwrap();

        let chat = Arc::new(MockProvider::with_responses(vec!["Blue.".into()]));
        let qp = QueryPipeline::new(
            Retriever::new(
                Embedder::new(Arc::new(MockProvider::with_vocabulary(&vocab))),
                store,
            ),
            Generator::new(Arc::clone(&chat)),
            p.collection().clone(),
            1,
            "Answer from context.",
        );
        let resp = qp.run("What color is the sky?").await.unwrap();
        assert_eq!(resp.answer, "Blue.");
        assert_eq!(resp.context.len(), 1);
        assert_eq!(resp.context[0].text, "The sky is blue.");

        let sent = chat.received();
        assert!(sent[0][1].content.contains("Source 1: The sky is blue."));
        assert_eq!(sent[0][0].content, "Answer from context.");
    }
}
