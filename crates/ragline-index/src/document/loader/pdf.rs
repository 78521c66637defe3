use std::fmt::Write as _;
use std::path::Path;
use std::pin::Pin;

use super::super::{DEFAULT_MAX_FILE_SIZE, Document, DocumentError, MetadataValue};
use super::DocumentLoader;

/// Extracts PDF text page by page, each page preceded by a `--- Page N ---`
/// marker line.
pub struct PdfLoader {
    pub max_file_size: u64,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

fn join_pages(pages: &[String]) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        let _ = writeln!(out, "--- Page {} ---\n{}\n", i + 1, page.trim());
    }
    out
}

impl DocumentLoader for PdfLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Document, DocumentError>> + Send + '_>>
    {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let path = tokio::fs::canonicalize(&path).await?;

            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(DocumentError::FileTooLarge(meta.len()));
            }

            let source = path.display().to_string();
            let pages = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_by_pages(&path)
                    .map_err(|e| DocumentError::Pdf(e.to_string()))
            })
            .await
            .map_err(|e| DocumentError::Io(std::io::Error::other(e)))??;
            tracing::debug!(%source, pages = pages.len(), "extracted pdf");

            Ok(Document::with_id(source.clone(), join_pages(&pages))
                .with_metadata("source", source)
                .with_metadata("content_type", "application/pdf")
                .with_metadata(
                    "pages",
                    MetadataValue::Integer(i64::try_from(pages.len()).unwrap_or(i64::MAX)),
                ))
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf"]
    }
}
