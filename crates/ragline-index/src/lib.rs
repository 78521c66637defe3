//! Retrieval pipeline: chunk, embed, store, retrieve, answer.

pub mod cancel;
pub mod document;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod in_memory_store;
pub mod pipeline;
pub mod qdrant_ops;
pub mod retriever;
pub mod vector_store;

pub use cancel::CallGuard;
#[cfg(feature = "pdf")]
pub use document::PdfLoader;
pub use document::{
    Chunk, Chunker, Document, DocumentLoader, Metadata, MetadataValue, TextLoader, loader_for,
};
pub use embedder::Embedder;
pub use error::RagError;
pub use generator::{AnswerResponse, Generator};
pub use in_memory_store::InMemoryVectorStore;
pub use pipeline::{IndexReport, IndexingPipeline, QueryPipeline};
pub use qdrant_ops::QdrantOps;
pub use retriever::Retriever;
pub use vector_store::{
    CollectionHandle, IndexedRecord, RecordBatch, RetrievalResult, RetrievedRecord, VectorStore,
    VectorStoreError,
};
