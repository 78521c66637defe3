//! Chat and embedding model capabilities used by the retrieval pipeline.

pub mod any;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use error::LlmError;
pub use provider::{LlmProvider, Message, Role};
