pub mod chunker;
pub mod error;
pub mod loader;
pub mod types;

pub use chunker::Chunker;
pub use error::DocumentError;
#[cfg(feature = "pdf")]
pub use loader::PdfLoader;
pub use loader::{DocumentLoader, TextLoader, default_loaders, loader_for};
pub use types::{Chunk, Document, Metadata, MetadataValue};

/// Default maximum file size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
