use super::types::{Chunk, Document};
use crate::error::RagError;

/// Fixed-window character splitter with overlap.
///
/// Windows are measured in Unicode scalar values, never bytes, so a chunk
/// boundary cannot fall inside a multi-byte character. Each window starts
/// `max_size - overlap` characters after the previous one; splitting stops
/// at the first window that reaches the end of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
}

impl Chunker {
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `max_size` is zero or
    /// `overlap` is not smaller than `max_size`.
    pub fn new(max_size: usize, overlap: usize) -> Result<Self, RagError> {
        if max_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        if overlap >= max_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({max_size})"
            )));
        }
        Ok(Self { max_size, overlap })
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    #[must_use]
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        self.split_text(document.id(), document.content())
    }

    #[must_use]
    pub fn split_text(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, including the end of the text.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = bounds.len() - 1;
        let step = self.max_size - self.overlap;

        let mut chunks = Vec::with_capacity(len.div_ceil(step));
        let mut start = 0;
        loop {
            let end = (start + self.max_size).min(len);
            chunks.push(Chunk {
                document_id: document_id.to_owned(),
                chunk_index: chunks.len(),
                text: text[bounds[start]..bounds[end]].to_owned(),
                start,
                end,
            });
            if end == len {
                break;
            }
            start += step;
        }
        chunks
    }
}
