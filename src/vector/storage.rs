//! Vector storage backends.
//!
//! All backends implement [`VectorBackend`]. Two are provided:
//!
//! - [`LocalVectorStore`]: in-memory records with JSON file snapshots. Every
//!   search is an exhaustive cosine scan.
//! - [`crate::vector::RemoteIndexBackend`]: a hosted index reached over HTTP.
//!
//! # Snapshot Format
//!
//! A snapshot is a single JSON object mapping id to record, written in
//! insertion order so that a reload preserves tie-breaking order:
//!
//! ```json
//! { "vec_1700000000000_0a1b2c3d": { "id": "...", "vector": [..], "metadata": {..} } }
//! ```
//!
//! Durability is at-most-once: inserts made after the last snapshot are lost
//! on crash.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::ser::{SerializeMap, Serializer};
use tracing::{debug, warn};

use crate::vector::engine::{SearchHit, rank_candidates};
use crate::vector::{
    Metadata, MetadataFilter, StoreStats, VectorDimension, VectorError, VectorId, VectorRecord,
};

/// Common interface over local and remote vector indexes.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Stores a new record under a freshly generated id.
    async fn insert(&self, vector: Vec<f32>, metadata: Metadata) -> Result<VectorId, VectorError>;

    /// Stores several records atomically: either all are stored or none.
    async fn insert_batch(
        &self,
        items: Vec<(Vec<f32>, Metadata)>,
    ) -> Result<Vec<VectorId>, VectorError>;

    /// Inserts or replaces the record with `record.id`.
    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorError>;

    /// Removes a record. Returns whether anything was removed.
    async fn delete(&self, id: &VectorId) -> Result<bool, VectorError>;

    async fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>, VectorError>;

    /// Every record whose metadata matches `filter`, in insertion order.
    async fn get_all(&self, filter: &MetadataFilter) -> Result<Vec<VectorRecord>, VectorError>;

    /// Top `top_k` records by cosine similarity to `query`.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorError>;

    async fn stats(&self) -> Result<StoreStats, VectorError>;
}

#[derive(Debug, Default)]
struct LocalState {
    /// Records keyed by insertion sequence number.
    records: BTreeMap<u64, VectorRecord>,
    /// Id to sequence number.
    index: HashMap<VectorId, u64>,
    next_seq: u64,
    dimension: Option<VectorDimension>,
}

impl LocalState {
    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorError> {
        match self.dimension {
            Some(dimension) => dimension.validate_vector(vector),
            None => VectorDimension::new(vector.len()).map(|_| ()),
        }
    }

    fn fresh_id(&self) -> VectorId {
        loop {
            let id = VectorId::generate();
            if !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    fn push(&mut self, record: VectorRecord) {
        if self.dimension.is_none() {
            self.dimension = VectorDimension::new(record.vector.len()).ok();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(record.id.clone(), seq);
        self.records.insert(seq, record);
    }
}

/// In-memory vector store with optional JSON snapshot persistence.
///
/// The first stored vector establishes the store dimension; later vectors of
/// a different length are rejected and leave the store unchanged. Deleting
/// the last record resets the dimension.
#[derive(Debug)]
pub struct LocalVectorStore {
    state: RwLock<LocalState>,
    snapshot_path: Option<PathBuf>,
    /// Bumped on every mutation; lets the snapshot writer skip clean states.
    generation: AtomicU64,
}

impl Default for LocalVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalVectorStore {
    /// Creates an empty store without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LocalState::default()),
            snapshot_path: None,
            generation: AtomicU64::new(0),
        }
    }

    /// Creates an empty store that snapshots to `path`.
    #[must_use]
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Opens a store backed by `path`, loading the snapshot if one exists.
    ///
    /// # Errors
    /// Returns [`VectorError::Persistence`] if the file exists but cannot be
    /// read or parsed, or holds vectors of inconsistent dimension.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VectorError> {
        let path = path.into();
        let store = Self::with_snapshot(path.clone());
        if !path.exists() {
            return Ok(store);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| VectorError::Persistence {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let records = parse_snapshot(&content).map_err(|reason| VectorError::Persistence {
            path: path.clone(),
            reason,
        })?;

        {
            let mut state = store.state.write();
            for record in records {
                state
                    .check_dimension(&record.vector)
                    .map_err(|e| VectorError::Persistence {
                        path: path.clone(),
                        reason: format!("record '{}': {e}", record.id),
                    })?;
                state.push(record);
            }
            debug!(path = %path.display(), records = state.records.len(), "loaded snapshot");
        }

        Ok(store)
    }

    /// Opens a store, starting empty if the snapshot is unreadable.
    ///
    /// A corrupt snapshot is moved aside to `<file>.corrupt` so the next
    /// snapshot write does not destroy it.
    #[must_use]
    pub fn open_or_empty(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(path.clone()) {
            Ok(store) => store,
            Err(e) => {
                warn!("{e}");
                let aside = path.with_extension("json.corrupt");
                if let Err(rename_err) = std::fs::rename(&path, &aside) {
                    warn!(
                        "could not move corrupt snapshot aside to {}: {rename_err}",
                        aside.display()
                    );
                }
                Self::with_snapshot(path)
            }
        }
    }

    /// Path snapshots are written to, if persistence is enabled.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Monotonic mutation counter.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Stores a new record and returns its id.
    ///
    /// # Errors
    /// [`VectorError::DimensionMismatch`] if the vector length differs from the
    /// established dimension; [`VectorError::InvalidDimension`] for an empty
    /// vector on an empty store.
    pub fn insert(&self, vector: Vec<f32>, metadata: Metadata) -> Result<VectorId, VectorError> {
        let mut state = self.state.write();
        state.check_dimension(&vector)?;
        let id = state.fresh_id();
        state.push(VectorRecord {
            id: id.clone(),
            vector,
            metadata,
        });
        drop(state);
        self.bump();
        Ok(id)
    }

    /// Stores every item or none of them.
    pub fn insert_batch(
        &self,
        items: Vec<(Vec<f32>, Metadata)>,
    ) -> Result<Vec<VectorId>, VectorError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.write();
        // Validate against the dimension the batch would establish
        let expected = match state.dimension {
            Some(dimension) => dimension,
            None => VectorDimension::new(items[0].0.len())?,
        };
        for (vector, _) in &items {
            expected.validate_vector(vector)?;
        }

        let mut ids = Vec::with_capacity(items.len());
        for (vector, metadata) in items {
            let id = state.fresh_id();
            state.push(VectorRecord {
                id: id.clone(),
                vector,
                metadata,
            });
            ids.push(id);
        }
        drop(state);
        self.bump();
        Ok(ids)
    }

    /// Inserts or replaces a record by id. A replaced record keeps its
    /// original insertion position.
    pub fn upsert(&self, record: VectorRecord) -> Result<(), VectorError> {
        let mut state = self.state.write();
        state.check_dimension(&record.vector)?;
        match state.index.get(&record.id).copied() {
            Some(seq) => {
                state.records.insert(seq, record);
            }
            None => state.push(record),
        }
        drop(state);
        self.bump();
        Ok(())
    }

    /// Removes a record by id. Returns false if it was not present.
    pub fn delete(&self, id: &VectorId) -> bool {
        let mut state = self.state.write();
        let Some(seq) = state.index.remove(id) else {
            return false;
        };
        state.records.remove(&seq);
        if state.records.is_empty() {
            state.dimension = None;
        }
        drop(state);
        self.bump();
        true
    }

    #[must_use]
    pub fn get(&self, id: &VectorId) -> Option<VectorRecord> {
        let state = self.state.read();
        let seq = state.index.get(id)?;
        state.records.get(seq).cloned()
    }

    /// Returns every record matching `filter` in insertion order.
    pub fn get_all(&self, filter: &MetadataFilter) -> Result<Vec<VectorRecord>, VectorError> {
        filter.validate()?;
        let state = self.state.read();
        Ok(state
            .records
            .values()
            .filter(|record| filter.matches(&record.metadata))
            .cloned()
            .collect())
    }

    /// Exhaustive cosine scan over records matching `filter`.
    ///
    /// # Errors
    /// [`VectorError::DimensionMismatch`] if the query length differs from the
    /// store dimension. An empty store or `top_k == 0` yields an empty list.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorError> {
        filter.validate()?;
        let state = self.state.read();
        if top_k == 0 || state.records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dimension) = state.dimension {
            dimension.validate_vector(query)?;
        }

        let candidates = state
            .records
            .values()
            .filter(|record| filter.matches(&record.metadata));
        Ok(rank_candidates(query, candidates, top_k)
            .into_iter()
            .map(|(score, record)| SearchHit {
                id: record.id.clone(),
                score,
                metadata: record.metadata.clone(),
            })
            .collect())
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            total_vectors: state.records.len(),
            dimension: state.dimension.map_or(0, |d| d.get()),
            index_fullness: 0.0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Serializes the current contents together with the generation they
    /// correspond to.
    pub fn snapshot_json(&self) -> Result<(u64, String), VectorError> {
        let state = self.state.read();
        let generation = self.generation();
        let mut buffer = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buffer);
        let mut map = serializer
            .serialize_map(Some(state.records.len()))
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        for record in state.records.values() {
            map.serialize_entry(&record.id, record)
                .map_err(|e| VectorError::Serialization(e.to_string()))?;
        }
        map.end()
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        drop(state);

        let json = String::from_utf8(buffer).map_err(|e| VectorError::Serialization(e.to_string()))?;
        Ok((generation, json))
    }

    /// Writes a snapshot synchronously. No-op without a snapshot path.
    pub fn save(&self) -> Result<(), VectorError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let (_, json) = self.snapshot_json()?;
        write_atomically(path, json.as_bytes()).map_err(|e| VectorError::Persistence {
            path: path.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl VectorBackend for LocalVectorStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn insert(&self, vector: Vec<f32>, metadata: Metadata) -> Result<VectorId, VectorError> {
        LocalVectorStore::insert(self, vector, metadata)
    }

    async fn insert_batch(
        &self,
        items: Vec<(Vec<f32>, Metadata)>,
    ) -> Result<Vec<VectorId>, VectorError> {
        LocalVectorStore::insert_batch(self, items)
    }

    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorError> {
        LocalVectorStore::upsert(self, record)
    }

    async fn delete(&self, id: &VectorId) -> Result<bool, VectorError> {
        Ok(LocalVectorStore::delete(self, id))
    }

    async fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>, VectorError> {
        Ok(LocalVectorStore::get(self, id))
    }

    async fn get_all(&self, filter: &MetadataFilter) -> Result<Vec<VectorRecord>, VectorError> {
        LocalVectorStore::get_all(self, filter)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorError> {
        LocalVectorStore::search(self, query, top_k, filter)
    }

    async fn stats(&self) -> Result<StoreStats, VectorError> {
        Ok(LocalVectorStore::stats(self))
    }
}

/// Parses a snapshot, preserving the order records appear in the file.
fn parse_snapshot(content: &str) -> Result<Vec<VectorRecord>, String> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(content).map_err(|e| e.to_string())?;

    map.into_iter()
        .map(|(key, value)| {
            let mut record: VectorRecord =
                serde_json::from_value(value).map_err(|e| format!("record '{key}': {e}"))?;
            // The map key is authoritative
            record.id = VectorId::new(key);
            Ok(record)
        })
        .collect()
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
