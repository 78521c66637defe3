use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::document::Metadata;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Reference to a named collection obtained from
/// [`VectorStore::get_or_create_collection`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionHandle {
    pub name: String,
    pub metadata: Metadata,
}

/// A stored `(id, text, vector, metadata)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Parallel `ids`, `texts`, `vectors` and optional metadata, checked for
/// equal length and a single vector dimension at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    records: Vec<IndexedRecord>,
    dimension: Option<usize>,
}

impl RecordBatch {
    /// # Errors
    ///
    /// Returns [`VectorStoreError::InvalidArgument`] when the sequences differ
    /// in length or a vector is empty, and
    /// [`VectorStoreError::DimensionMismatch`] when vectors disagree in length.
    pub fn new(
        ids: Vec<String>,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Self, VectorStoreError> {
        let n = ids.len();
        if texts.len() != n || vectors.len() != n {
            return Err(VectorStoreError::InvalidArgument(format!(
                "ids ({n}), texts ({}) and vectors ({}) must have equal length",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(m) = &metadata
            && m.len() != n
        {
            return Err(VectorStoreError::InvalidArgument(format!(
                "metadata ({}) must match ids ({n}) in length",
                m.len()
            )));
        }

        let dimension = vectors.first().map(Vec::len);
        if dimension == Some(0) {
            return Err(VectorStoreError::InvalidArgument(
                "vectors must not be empty".into(),
            ));
        }
        if let Some(expected) = dimension
            && let Some(bad) = vectors.iter().find(|v| v.len() != expected)
        {
            return Err(VectorStoreError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let mut metadata = metadata.map(Vec::into_iter);
        let records = ids
            .into_iter()
            .zip(texts)
            .zip(vectors)
            .map(|((id, text), vector)| IndexedRecord {
                id,
                text,
                vector,
                metadata: metadata
                    .as_mut()
                    .and_then(Iterator::next)
                    .unwrap_or_default(),
            })
            .collect();

        Ok(Self { records, dimension })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Vector length shared by every record, `None` for an empty batch.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<IndexedRecord> {
        self.records
    }
}

/// One ranked query hit. `score` is cosine similarity; higher is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedRecord {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl RetrievedRecord {
    /// Cosine distance, `1 - score`.
    #[must_use]
    pub fn distance(&self) -> f32 {
        1.0 - self.score
    }
}

/// Hits ordered by decreasing score; never longer than the requested `k`.
pub type RetrievalResult = Vec<RetrievedRecord>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) fn check_k(k: usize) -> Result<(), VectorStoreError> {
    if k == 0 {
        return Err(VectorStoreError::InvalidArgument(
            "k must be greater than zero".into(),
        ));
    }
    Ok(())
}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), VectorStoreError> {
    if expected != actual {
        return Err(VectorStoreError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Named collections of embedded records with nearest-neighbour lookup.
///
/// A collection's dimensionality is fixed by the first vectors written to it.
pub trait VectorStore: Send + Sync {
    /// Return a handle to `name`, creating the collection if absent. Never
    /// touches existing records.
    fn get_or_create_collection<'a>(
        &'a self,
        name: &'a str,
        metadata: Metadata,
    ) -> BoxFuture<'a, Result<CollectionHandle, VectorStoreError>>;

    /// Upsert records; an existing id is overwritten.
    fn add<'a>(
        &'a self,
        collection: &'a CollectionHandle,
        batch: RecordBatch,
    ) -> BoxFuture<'a, Result<(), VectorStoreError>>;

    /// Up to `k` records nearest to `vector`, best first.
    fn query<'a>(
        &'a self,
        collection: &'a CollectionHandle,
        vector: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<RetrievalResult, VectorStoreError>>;

    fn count<'a>(
        &'a self,
        collection: &'a CollectionHandle,
    ) -> BoxFuture<'a, Result<usize, VectorStoreError>>;

    /// Drop a collection and all of its records. Missing collections are not an error.
    fn delete_collection<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), VectorStoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MetadataValue;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn batch_rejects_length_mismatch() {
        let err = RecordBatch::new(
            strings(&["a", "b"]),
            strings(&["x"]),
            vec![vec![1.0], vec![2.0]],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, VectorStoreError::InvalidArgument(_)));
    }

    #[test]
    fn batch_rejects_metadata_length_mismatch() {
        let err = RecordBatch::new(
            strings(&["a"]),
            strings(&["x"]),
            vec![vec![1.0]],
            Some(vec![]),
        )
        .unwrap_err();
        assert!(matches!(err, VectorStoreError::InvalidArgument(_)));
    }

    #[test]
    fn batch_rejects_mixed_dimensions() {
        let err = RecordBatch::new(
            strings(&["a", "b"]),
            strings(&["x", "y"]),
            vec![vec![1.0, 0.0], vec![1.0]],
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn batch_rejects_empty_vectors() {
        let err =
            RecordBatch::new(strings(&["a"]), strings(&["x"]), vec![vec![]], None).unwrap_err();
        assert!(matches!(err, VectorStoreError::InvalidArgument(_)));
    }

    #[test]
    fn batch_zips_metadata() {
        let meta = Metadata::from([("source".to_owned(), MetadataValue::from("doc"))]);
        let batch = RecordBatch::new(
            strings(&["a"]),
            strings(&["x"]),
            vec![vec![1.0, 2.0]],
            Some(vec![meta.clone()]),
        )
        .unwrap();
        assert_eq!(batch.dimension(), Some(2));
        assert_eq!(batch.records()[0].metadata, meta);
    }

    #[test]
    fn empty_batch_has_no_dimension() {
        let batch = RecordBatch::new(vec![], vec![], vec![], None).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.dimension(), None);
    }

    #[test]
    fn distance_is_one_minus_score() {
        let r = RetrievedRecord {
            id: "a".into(),
            text: String::new(),
            score: 0.75,
            metadata: Metadata::new(),
        };
        assert!((r.distance() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn check_k_rejects_zero() {
        assert!(check_k(0).is_err());
        assert!(check_k(1).is_ok());
    }
}
