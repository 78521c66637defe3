//! Qdrant-backed [`VectorStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, value::Kind, vectors_config,
};

use crate::document::{Metadata, MetadataValue};
use crate::vector_store::{
    BoxFuture, CollectionHandle, RecordBatch, RetrievalResult, RetrievedRecord, VectorStore,
    VectorStoreError, check_dimension, check_k,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

const RECORD_ID_FIELD: &str = "record_id";
const TEXT_FIELD: &str = "text";
const METADATA_FIELD: &str = "metadata";

/// Thin wrapper over [`Qdrant`] that maps record ids to UUID point ids and
/// creates collections lazily, sized by the first batch written.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
    dimensions: Arc<Mutex<HashMap<String, usize>>>,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` connected to the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str) -> QdrantResult<Self> {
        let client = Qdrant::from_url(url).build().map_err(Box::new)?;
        Ok(Self {
            client,
            dimensions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Deterministic point id for a record id.
    #[must_use]
    pub fn point_id(record_id: &str) -> String {
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, record_id.as_bytes()).to_string()
    }

    fn cached_dimension(&self, collection: &str) -> Option<usize> {
        self.dimensions
            .lock()
            .ok()
            .and_then(|d| d.get(collection).copied())
    }

    fn remember_dimension(&self, collection: &str, size: usize) {
        if let Ok(mut d) = self.dimensions.lock() {
            d.insert(collection.to_owned(), size);
        }
    }

    fn forget_dimension(&self, collection: &str) {
        if let Ok(mut d) = self.dimensions.lock() {
            d.remove(collection);
        }
    }

    /// Vector size of an existing collection, `None` if it does not exist yet.
    async fn dimension(&self, collection: &str) -> QdrantResult<Option<usize>> {
        if let Some(size) = self.cached_dimension(collection) {
            return Ok(Some(size));
        }
        if !self
            .client
            .collection_exists(collection)
            .await
            .map_err(Box::new)?
        {
            return Ok(None);
        }
        let info = self
            .client
            .collection_info(collection)
            .await
            .map_err(Box::new)?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                vectors_config::Config::Params(params) => usize::try_from(params.size).ok(),
                vectors_config::Config::ParamsMap(_) => None,
            });
        if let Some(size) = size {
            self.remember_dimension(collection, size);
        }
        Ok(size)
    }

    /// Dimension of `collection` checked against `actual`. A cached size that
    /// disagrees is dropped and re-read, since another process may have
    /// recreated the collection.
    async fn checked_dimension(
        &self,
        collection: &str,
        actual: usize,
        on_error: fn(String) -> VectorStoreError,
    ) -> Result<Option<usize>, VectorStoreError> {
        match self.cached_dimension(collection) {
            Some(expected) if expected == actual => return Ok(Some(expected)),
            Some(_) => self.forget_dimension(collection),
            None => {}
        }
        let size = self
            .dimension(collection)
            .await
            .map_err(|e| on_error(e.to_string()))?;
        if let Some(expected) = size {
            check_dimension(expected, actual)?;
        }
        Ok(size)
    }

    async fn create_collection(&self, collection: &str, vector_size: usize) -> QdrantResult<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(vector_size as u64, Distance::Cosine)),
            )
            .await
            .map_err(Box::new)?;
        tracing::info!(collection, vector_size, "created Qdrant collection");
        self.remember_dimension(collection, vector_size);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointStruct>) -> QdrantResult<()> {
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> QdrantResult<Vec<ScoredPoint>> {
        let builder = SearchPointsBuilder::new(collection, vector, limit).with_payload(true);
        let results = self.client.search_points(builder).await.map_err(Box::new)?;
        Ok(results.result)
    }

    /// Convert a JSON value to a Qdrant payload map.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if deserialization fails.
    pub fn json_to_payload(
        value: serde_json::Value,
    ) -> Result<HashMap<String, qdrant_client::qdrant::Value>, serde_json::Error> {
        serde_json::from_value(value)
    }
}

fn record_payload(
    id: &str,
    text: &str,
    metadata: &Metadata,
) -> Result<HashMap<String, qdrant_client::qdrant::Value>, VectorStoreError> {
    let meta: serde_json::Map<String, serde_json::Value> = metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    QdrantOps::json_to_payload(serde_json::json!({
        RECORD_ID_FIELD: id,
        TEXT_FIELD: text,
        METADATA_FIELD: meta,
    }))
    .map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn kind_to_json(kind: Kind) -> Option<serde_json::Value> {
    Some(match kind {
        Kind::StringValue(s) => serde_json::Value::String(s),
        Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
        Kind::DoubleValue(d) => serde_json::Number::from_f64(d).map(serde_json::Value::Number)?,
        Kind::BoolValue(b) => serde_json::Value::Bool(b),
        Kind::StructValue(s) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .filter_map(|(k, v)| Some((k, kind_to_json(v.kind?)?)))
                .collect(),
        ),
        _ => return None,
    })
}

fn scored_point_to_record(point: ScoredPoint) -> RetrievedRecord {
    let mut payload: HashMap<String, serde_json::Value> = point
        .payload
        .into_iter()
        .filter_map(|(k, v)| Some((k, kind_to_json(v.kind?)?)))
        .collect();

    let mut take_string = |field: &str| match payload.remove(field) {
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };
    let id = take_string(RECORD_ID_FIELD);
    let text = take_string(TEXT_FIELD);

    let metadata = match payload.remove(METADATA_FIELD) {
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| MetadataValue::from_json(v).map(|mv| (k.clone(), mv)))
            .collect(),
        _ => Metadata::new(),
    };

    RetrievedRecord {
        id,
        text,
        score: point.score,
        metadata,
    }
}

impl VectorStore for QdrantOps {
    fn get_or_create_collection<'a>(
        &'a self,
        name: &'a str,
        metadata: Metadata,
    ) -> BoxFuture<'a, Result<CollectionHandle, VectorStoreError>> {
        // Qdrant needs a vector size to create a collection, so creation is
        // deferred to the first `add`; existing collections are left intact.
        Box::pin(async move {
            self.client
                .collection_exists(name)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            Ok(CollectionHandle {
                name: name.to_owned(),
                metadata,
            })
        })
    }

    fn add<'a>(
        &'a self,
        collection: &'a CollectionHandle,
        batch: RecordBatch,
    ) -> BoxFuture<'a, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let Some(size) = batch.dimension() else {
                return Ok(());
            };
            let name = collection.name.as_str();
            if self
                .checked_dimension(name, size, VectorStoreError::Collection)
                .await?
                .is_none()
            {
                self.create_collection(name, size)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            }

            let count = batch.len();
            let points = batch
                .into_records()
                .into_iter()
                .map(|r| {
                    let payload = record_payload(&r.id, &r.text, &r.metadata)?;
                    Ok(PointStruct::new(Self::point_id(&r.id), r.vector, payload))
                })
                .collect::<Result<Vec<_>, VectorStoreError>>()?;

            self.upsert(name, points).await.map_err(|e| {
                self.forget_dimension(name);
                VectorStoreError::Upsert(e.to_string())
            })?;
            tracing::debug!(collection = name, count, "upserted points");
            Ok(())
        })
    }

    fn query<'a>(
        &'a self,
        collection: &'a CollectionHandle,
        vector: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<RetrievalResult, VectorStoreError>> {
        Box::pin(async move {
            check_k(k)?;
            let name = collection.name.as_str();
            if self
                .checked_dimension(name, vector.len(), VectorStoreError::Search)
                .await?
                .is_none()
            {
                return Ok(Vec::new());
            }

            let results = self
                .search(name, vector.to_vec(), k as u64)
                .await
                .map_err(|e| {
                    self.forget_dimension(name);
                    VectorStoreError::Search(e.to_string())
                })?;
            let mut records: Vec<RetrievedRecord> =
                results.into_iter().map(scored_point_to_record).collect();
            records.sort_by(|a, b| b.score.total_cmp(&a.score));
            records.truncate(k);
            Ok(records)
        })
    }

    fn count<'a>(
        &'a self,
        collection: &'a CollectionHandle,
    ) -> BoxFuture<'a, Result<usize, VectorStoreError>> {
        Box::pin(async move {
            let name = collection.name.as_str();
            if !self
                .client
                .collection_exists(name)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?
            {
                return Ok(0);
            }
            let resp = self
                .client
                .count(CountPointsBuilder::new(name).exact(true))
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let count = resp.result.map_or(0, |r| r.count);
            usize::try_from(count).map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn delete_collection<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), VectorStoreError>> {
        Box::pin(async move {
            self.forget_dimension(name);
            if self
                .client
                .collection_exists(name)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?
            {
                self.client
                    .delete_collection(name)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
                tracing::info!(collection = name, "deleted Qdrant collection");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_url() {
        let ops = QdrantOps::new("http://localhost:6334");
        assert!(ops.is_ok());
    }

    #[test]
    fn new_invalid_url() {
        let ops = QdrantOps::new("not a valid url");
        assert!(ops.is_err());
    }

    #[test]
    fn debug_format() {
        let ops = QdrantOps::new("http://localhost:6334").unwrap();
        let dbg = format!("{ops:?}");
        assert!(dbg.contains("QdrantOps"));
    }

    #[tokio::test]
    async fn mismatched_cached_dimension_is_rechecked() {
        let ops = QdrantOps::new("http://127.0.0.1:9").unwrap();
        ops.remember_dimension("notes", 4);
        let col = CollectionHandle {
            name: "notes".into(),
            metadata: Metadata::new(),
        };
        let batch = RecordBatch::new(
            vec!["a".into()],
            vec!["alpha".into()],
            vec![vec![1.0; 8]],
            None,
        )
        .unwrap();

        // Nothing listens on the port, so the re-read fails instead of the
        // stale size producing a mismatch.
        let err = ops.add(&col, batch).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::Collection(_)));
        assert!(ops.cached_dimension("notes").is_none());
    }

    #[test]
    fn point_id_is_stable_uuid() {
        let a = QdrantOps::point_id("doc:0");
        assert_eq!(a, QdrantOps::point_id("doc:0"));
        assert_ne!(a, QdrantOps::point_id("doc:1"));
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn json_to_payload_empty() {
        let result = QdrantOps::json_to_payload(serde_json::json!({}));
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn payload_round_trips_through_scored_point() {
        let metadata = Metadata::from([
            ("source".to_owned(), MetadataValue::from("notes.txt")),
            ("chunk_index".to_owned(), MetadataValue::from(2_i64)),
        ]);
        let payload = record_payload("doc:2", "The sky is blue.", &metadata).unwrap();
        let point = ScoredPoint {
            payload,
            score: 0.9,
            ..ScoredPoint::default()
        };

        let record = scored_point_to_record(point);
        assert_eq!(record.id, "doc:2");
        assert_eq!(record.text, "The sky is blue.");
        assert_eq!(record.metadata, metadata);
        assert!((record.score - 0.9).abs() < f32::EPSILON);
    }
}
