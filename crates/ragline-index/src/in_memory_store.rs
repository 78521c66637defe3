use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::document::Metadata;
use crate::vector_store::{
    BoxFuture, CollectionHandle, RecordBatch, RetrievalResult, RetrievedRecord, VectorStore,
    VectorStoreError, check_dimension, check_k,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    text: String,
    vector: Vec<f32>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InMemoryCollection {
    #[serde(default)]
    metadata: Metadata,
    dimension: Option<usize>,
    records: BTreeMap<String, StoredRecord>,
}

type Collections = BTreeMap<String, InMemoryCollection>;

/// Brute-force cosine search over records held in process memory.
///
/// With a snapshot path every mutation is applied to a copy of the store,
/// written as JSON, and only then made visible; a failed write leaves both
/// memory and file at the previous state. [`InMemoryVectorStore::open`]
/// reloads the snapshot, so separate processes can share an index.
pub struct InMemoryVectorStore {
    collections: RwLock<Collections>,
    persist_path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Collections::new()),
            persist_path: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a store backed by the snapshot at `path`, loading it if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, VectorStoreError> {
        let path = path.into();
        let collections = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Collections>(&bytes).map_err(|e| {
                VectorStoreError::Serialization(format!(
                    "corrupt store snapshot {}: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => {
                return Err(VectorStoreError::Connection(format!(
                    "cannot read store snapshot {}: {e}",
                    path.display()
                )));
            }
        };
        tracing::debug!(
            path = %path.display(),
            collections = collections.len(),
            "opened in-memory vector store"
        );
        Ok(Self {
            collections: RwLock::new(collections),
            persist_path: Some(path),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Apply `mutate` and make the result visible, writing the snapshot first
    /// when one is configured.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut Collections) -> Result<T, VectorStoreError>,
    ) -> Result<T, VectorStoreError> {
        let Some(path) = &self.persist_path else {
            let mut cols = self.collections.write().map_err(poisoned)?;
            return mutate(&mut cols);
        };
        // Held until the new state is visible, so writers apply in snapshot order.
        let _guard = self.persist_lock.lock().await;
        let mut next = self.collections.read().map_err(poisoned)?.clone();
        let out = mutate(&mut next)?;
        write_snapshot(path, &next).await?;
        *self.collections.write().map_err(poisoned)? = next;
        Ok(out)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn poisoned<E: std::fmt::Display>(e: E) -> VectorStoreError {
    VectorStoreError::Collection(format!("store lock poisoned: {e}"))
}

async fn write_snapshot(path: &Path, cols: &Collections) -> Result<(), VectorStoreError> {
    let json =
        serde_json::to_vec(cols).map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
    Ok(())
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("persist_path", &self.persist_path)
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorStore for InMemoryVectorStore {
    fn get_or_create_collection<'a>(
        &'a self,
        name: &'a str,
        metadata: Metadata,
    ) -> BoxFuture<'a, Result<CollectionHandle, VectorStoreError>> {
        Box::pin(async move {
            let existing = self
                .collections
                .read()
                .map_err(poisoned)?
                .get(name)
                .map(|col| col.metadata.clone());
            if let Some(metadata) = existing {
                return Ok(CollectionHandle {
                    name: name.to_owned(),
                    metadata,
                });
            }
            let metadata = self
                .commit(|cols| {
                    let col = cols
                        .entry(name.to_owned())
                        .or_insert_with(|| InMemoryCollection {
                            metadata,
                            ..InMemoryCollection::default()
                        });
                    Ok(col.metadata.clone())
                })
                .await?;
            tracing::debug!(collection = name, "created in-memory collection");
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
            let Some(dimension) = batch.dimension() else {
                return Ok(());
            };
            let count = batch.len();
            self.commit(|cols| {
                let col = cols
                    .entry(collection.name.clone())
                    .or_insert_with(|| InMemoryCollection {
                        metadata: collection.metadata.clone(),
                        ..InMemoryCollection::default()
                    });
                match col.dimension {
                    Some(expected) => check_dimension(expected, dimension)?,
                    None => col.dimension = Some(dimension),
                }
                for r in batch.into_records() {
                    col.records.insert(
                        r.id,
                        StoredRecord {
                            text: r.text,
                            vector: r.vector,
                            metadata: r.metadata,
                        },
                    );
                }
                Ok(())
            })
            .await?;
            tracing::debug!(collection = %collection.name, count, "upserted records");
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
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let Some(col) = cols.get(&collection.name) else {
                return Ok(Vec::new());
            };
            if let Some(expected) = col.dimension {
                check_dimension(expected, vector.len())?;
            }

            let mut scored: Vec<RetrievedRecord> = col
                .records
                .iter()
                .map(|(id, r)| RetrievedRecord {
                    id: id.clone(),
                    text: r.text.clone(),
                    score: cosine_similarity(vector, &r.vector),
                    metadata: r.metadata.clone(),
                })
                .collect();

            scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
            scored.truncate(k);
            Ok(scored)
        })
    }

    fn count<'a>(
        &'a self,
        collection: &'a CollectionHandle,
    ) -> BoxFuture<'a, Result<usize, VectorStoreError>> {
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.get(&collection.name).map_or(0, |c| c.records.len()))
        })
    }

    fn delete_collection<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let exists = self.collections.read().map_err(poisoned)?.contains_key(name);
            if exists {
                self.commit(|cols| Ok(cols.remove(name))).await?;
                tracing::info!(collection = name, "deleted collection");
            }
            Ok(())
        })
    }
}
