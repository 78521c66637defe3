use std::path::Path;
use std::pin::Pin;

use super::super::{DEFAULT_MAX_FILE_SIZE, Document, DocumentError};
use super::{DocumentLoader, extension};

/// Loads plain-text and markdown files. The document id is the canonical
/// path, so re-indexing the same file overwrites its records.
pub struct TextLoader {
    pub max_file_size: u64,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl DocumentLoader for TextLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Document, DocumentError>> + Send + '_>>
    {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let path = tokio::fs::canonicalize(&path).await?;

            let content_type = match extension(&path).as_str() {
                "txt" | "text" => "text/plain",
                "md" | "markdown" => "text/markdown",
                other => return Err(DocumentError::UnsupportedFormat(other.to_owned())),
            };

            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(DocumentError::FileTooLarge(meta.len()));
            }

            let content = tokio::fs::read_to_string(&path).await?;
            let source = path.display().to_string();
            tracing::debug!(%source, bytes = content.len(), "loaded document");

            Ok(Document::with_id(source.clone(), content)
                .with_metadata("source", source)
                .with_metadata("content_type", content_type))
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["txt", "text", "md", "markdown"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("test.txt");
        std::fs::write(&file, "hello world").unwrap();

        let doc = TextLoader::default().load(&file).await.unwrap();
        assert_eq!(doc.content(), "hello world");
        assert_eq!(doc.metadata()["content_type"].as_str(), Some("text/plain"));
        assert_eq!(doc.metadata()["source"].as_str(), Some(doc.id()));
    }

    #[tokio::test]
    async fn load_markdown_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("readme.md");
        std::fs::write(&file, "# Title").unwrap();

        let doc = TextLoader::default().load(&file).await.unwrap();
        assert_eq!(
            doc.metadata()["content_type"].as_str(),
            Some("text/markdown")
        );
    }

    #[tokio::test]
    async fn extension_match_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("NOTES.MD");
        std::fs::write(&file, "# Upper").unwrap();

        let doc = TextLoader::default().load(&file).await.unwrap();
        assert_eq!(
            doc.metadata()["content_type"].as_str(),
            Some("text/markdown")
        );
    }

    #[tokio::test]
    async fn same_file_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one").unwrap();
        let first = TextLoader::default().load(&file).await.unwrap();
        std::fs::write(&file, "two").unwrap();
        let second = TextLoader::default().load(&file).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn load_nonexistent_file() {
        let result = TextLoader::default()
            .load(Path::new("/nonexistent/file.txt"))
            .await;
        assert!(matches!(result, Err(DocumentError::Io(_))));
    }

    #[tokio::test]
    async fn unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.pdf");
        std::fs::write(&file, "binary").unwrap();

        let result = TextLoader::default().load(&file).await;
        assert!(matches!(result, Err(DocumentError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn file_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.txt");
        std::fs::write(&file, "0123456789").unwrap();

        let loader = TextLoader { max_file_size: 5 };
        let result = loader.load(&file).await;
        assert!(matches!(result, Err(DocumentError::FileTooLarge(10))));
    }
}
