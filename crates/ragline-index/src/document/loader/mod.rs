#[cfg(feature = "pdf")]
mod pdf;
mod text;

use std::path::Path;
use std::pin::Pin;

#[cfg(feature = "pdf")]
pub use pdf::PdfLoader;
pub use text::TextLoader;

use super::{Document, DocumentError};

pub trait DocumentLoader: Send + Sync {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Document, DocumentError>> + Send + '_>>;

    /// Lowercase file extensions this loader accepts, without the dot.
    fn supported_extensions(&self) -> &[&str];
}

/// Every loader compiled into this build.
#[must_use]
pub fn default_loaders() -> Vec<Box<dyn DocumentLoader>> {
    let mut loaders: Vec<Box<dyn DocumentLoader>> = vec![Box::new(TextLoader::default())];
    #[cfg(feature = "pdf")]
    loaders.push(Box::new(PdfLoader::default()));
    loaders
}

/// Pick the loader for `path` by its extension.
///
/// # Errors
///
/// Returns [`DocumentError::UnsupportedFormat`] if no compiled-in loader
/// accepts the extension.
pub fn loader_for(path: &Path) -> Result<Box<dyn DocumentLoader>, DocumentError> {
    let ext = extension(path);
    default_loaders()
        .into_iter()
        .find(|loader| loader.supported_extensions().iter().any(|e| *e == ext))
        .ok_or(DocumentError::UnsupportedFormat(ext))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}
