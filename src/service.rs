//! The store service.
//!
//! [`RagStore`] ties the pieces together: an embedding [`ProviderChain`], a
//! [`VectorBackend`], the [`SearchEngine`], the ingestion [`BatchQueue`] and,
//! for the local backend, the background [`SnapshotWriter`]. It is created
//! once with [`RagStore::init`] and shut down with [`RagStore::close`].
//!
//! Every mutation clears the search result cache and schedules a snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchQueue, BatchSink, FlushOutcome, PendingItem};
use crate::config::Settings;
use crate::embedding::{
    EmbeddingProvider, OllamaProvider, OpenAiProvider, ProviderChain, ProviderError, chunk_text,
};
use crate::error::{RagError, RagResult};
use crate::snapshot::SnapshotWriter;
use crate::vector::{
    CacheStats, LocalVectorStore, Metadata, MetadataFilter, RemoteIndexBackend,
    RemoteIndexConfig, SearchEngine, SearchHit, SearchOptions, SearchRequest, SearchResult,
    StoreStats, VectorBackend, VectorDimension, VectorId, VectorRecord, hierarchical_clustering,
    kmeans_clustering,
};

/// Default chunk size, in characters, for [`RagStore::ingest`].
pub const DEFAULT_CHUNK_CHARS: usize = 1000;

/// A group of stored records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub label: usize,
    pub centroid: Vec<f32>,
    pub members: Vec<VectorId>,
}

/// Hit/miss counters of both caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub embeddings: CacheStats,
    pub search: CacheStats,
}

/// Write path shared by direct inserts and batch flushes.
struct StoreWriter {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<ProviderChain>,
    engine: Arc<SearchEngine>,
    snapshot: Option<Arc<SnapshotWriter>>,
}

impl StoreWriter {
    /// Fills in the fields the store owns: source text, provider, timestamp.
    fn stamp(mut metadata: Metadata, text: &str, provider: &str) -> Metadata {
        if metadata.text.is_none() {
            metadata.text = Some(text.to_string());
        }
        metadata.provider = Some(provider.to_string());
        if metadata.timestamp.is_none() {
            metadata.timestamp = Some(chrono::Utc::now().to_rfc3339());
        }
        metadata
    }

    fn mutated(&self) {
        self.engine.invalidate();
        if let Some(snapshot) = &self.snapshot {
            snapshot.notify();
        }
    }

    async fn embed_and_insert(&self, text: &str, metadata: Metadata) -> RagResult<VectorRecord> {
        let embedding = self.embedder.embed(text).await;
        let metadata = Self::stamp(metadata, text, &embedding.provider);
        let id = self
            .backend
            .insert(embedding.vector.clone(), metadata.clone())
            .await?;
        self.mutated();
        Ok(VectorRecord {
            id,
            vector: embedding.vector,
            metadata,
        })
    }
}

#[async_trait]
impl BatchSink for StoreWriter {
    async fn write_batch(&self, items: &[PendingItem]) -> RagResult<usize> {
        let mut batch = Vec::with_capacity(items.len());
        for item in items {
            let embedding = self.embedder.embed(&item.text).await;
            let metadata = Self::stamp(item.metadata.clone(), &item.text, &embedding.provider);
            batch.push((embedding.vector, metadata));
        }
        let ids = self.backend.insert_batch(batch).await?;
        self.mutated();
        Ok(ids.len())
    }
}

/// Vector store service: embedding, storage, search and clustering.
pub struct RagStore {
    settings: Settings,
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<ProviderChain>,
    engine: Arc<SearchEngine>,
    writer: Arc<StoreWriter>,
    batch: Arc<BatchQueue>,
    snapshot: Option<Arc<SnapshotWriter>>,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RagStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagStore")
            .field("backend", &self.backend.name())
            .field("embedder", &self.embedder)
            .field("pending", &self.batch.len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl RagStore {
    /// Builds the store from settings and starts its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`RagError::ConfigError`] for invalid settings and a vector
    /// error if the remote backend cannot be constructed.
    pub fn init(settings: Settings) -> RagResult<Self> {
        settings.validate()?;

        let dimension = VectorDimension::new(settings.embedding.dimension)?;
        let embedder = Arc::new(build_embedder(&settings, dimension));
        let engine = Arc::new(SearchEngine::new(
            settings.search.vector_weight,
            settings.search.cache_capacity,
            settings.search.evict_fraction,
        )?);

        let backend: Arc<dyn VectorBackend>;
        let mut snapshot = None;
        if settings.remote.enabled {
            backend = Arc::new(RemoteIndexBackend::new(RemoteIndexConfig {
                host: settings.remote.host.clone(),
                api_key: settings.remote.api_key.clone().unwrap_or_default(),
                namespace: settings.remote.namespace.clone(),
                timeout: Duration::from_millis(settings.remote.timeout_ms),
                scan_limit: settings.remote.scan_limit,
            })?);
        } else {
            let local = Arc::new(LocalVectorStore::open_or_empty(settings.snapshot_path()));
            // Fallback vectors must match what the snapshot already holds
            embedder.pin_dimension(local.stats().dimension);
            snapshot = SnapshotWriter::spawn(
                Arc::clone(&local),
                Duration::from_millis(settings.store.snapshot_debounce_ms),
                Duration::from_secs(settings.store.snapshot_retry_secs),
            )
            .map(Arc::new);
            backend = local;
        }

        let writer = Arc::new(StoreWriter {
            backend: Arc::clone(&backend),
            embedder: Arc::clone(&embedder),
            engine: Arc::clone(&engine),
            snapshot: snapshot.clone(),
        });

        let batch = Arc::new(BatchQueue::new(
            settings.batch.size_threshold,
            Duration::from_millis(settings.batch.flush_interval_ms),
        ));
        let cancel = CancellationToken::new();
        let flusher = batch.spawn_flusher(writer.clone(), cancel.clone());

        info!(
            backend = backend.name(),
            providers = ?embedder.provider_names(),
            "vector store ready"
        );

        Ok(Self {
            settings,
            backend,
            embedder,
            engine,
            writer,
            batch,
            snapshot,
            cancel,
            flusher: Mutex::new(Some(flusher)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn ensure_open(&self) -> RagResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RagError::Closed);
        }
        Ok(())
    }

    /// Embeds `text`, stores it and returns the stored record.
    ///
    /// Provider failures fall back to the local generator and never surface
    /// here; errors come only from the backend (e.g. dimension mismatch).
    pub async fn embed(&self, text: &str, metadata: Metadata) -> RagResult<VectorRecord> {
        self.ensure_open()?;
        self.writer.embed_and_insert(text, metadata).await
    }

    /// Inserts or replaces a record under its own id.
    pub async fn upsert(&self, record: VectorRecord) -> RagResult<()> {
        self.ensure_open()?;
        self.backend.upsert(record).await?;
        self.writer.mutated();
        Ok(())
    }

    /// Text search: embeds `query` and ranks stored records against it.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
        options: SearchOptions,
    ) -> RagResult<Vec<SearchResult>> {
        self.ensure_open()?;
        filter.validate()?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let request = SearchRequest {
            query,
            top_k,
            filter,
            options,
        };
        if let Some(cached) = self.engine.lookup(&request) {
            return Ok(cached);
        }

        let embedding = self.embedder.embed(query).await;
        Ok(self
            .engine
            .execute(self.backend.as_ref(), &request, &embedding.vector)
            .await?)
    }

    /// Raw vector search without rerank or caching.
    pub async fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> RagResult<Vec<SearchHit>> {
        self.ensure_open()?;
        Ok(self.backend.search(vector, top_k, filter).await?)
    }

    pub async fn get_all_vectors(&self, filter: &MetadataFilter) -> RagResult<Vec<VectorRecord>> {
        self.ensure_open()?;
        Ok(self.backend.get_all(filter).await?)
    }

    pub async fn get_vector(&self, id: &VectorId) -> RagResult<Option<VectorRecord>> {
        self.ensure_open()?;
        Ok(self.backend.get(id).await?)
    }

    /// Removes a record. Returns false if it was not present.
    pub async fn delete_vector(&self, id: &VectorId) -> RagResult<bool> {
        self.ensure_open()?;
        let removed = self.backend.delete(id).await?;
        if removed {
            self.writer.mutated();
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> RagResult<StoreStats> {
        self.ensure_open()?;
        Ok(self.backend.stats().await?)
    }

    /// Grows the local IDF vocabulary.
    pub fn update_vocabulary<S: AsRef<str>>(&self, texts: &[S]) {
        self.embedder.update_vocabulary(texts);
        // Cached query embeddings are gone; cached results would not match
        self.engine.invalidate();
    }

    /// Queues a text for batched embedding and insertion.
    pub fn enqueue(&self, text: impl Into<String>, metadata: Metadata) -> RagResult<()> {
        self.ensure_open()?;
        self.batch.enqueue(PendingItem::new(text, metadata));
        Ok(())
    }

    /// Splits a document into chunks and queues each one.
    ///
    /// Each chunk's metadata carries its position as `chunk_index`. Returns
    /// the number of queued chunks.
    pub fn ingest(&self, text: &str, metadata: Metadata, max_chars: usize) -> RagResult<usize> {
        self.ensure_open()?;
        let chunks = chunk_text(text, max_chars);
        let count = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let metadata = metadata.clone().with_extra("chunk_index", index);
            self.batch.enqueue(PendingItem::new(chunk, metadata));
        }
        debug!(chunks = count, "document queued for ingestion");
        Ok(count)
    }

    /// Flushes the batch queue now.
    pub async fn flush(&self) -> RagResult<FlushOutcome> {
        self.ensure_open()?;
        self.batch.flush(self.writer.as_ref()).await
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// K-means over stored records matching `filter`.
    pub async fn cluster_kmeans(&self, k: usize, filter: &MetadataFilter) -> RagResult<Vec<Cluster>> {
        let cap = self.settings.clustering.max_input;
        let records = self.clustering_input(filter, cap).await?;
        let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.vector.clone()).collect();
        let result = kmeans_clustering(
            &vectors,
            k,
            self.settings.clustering.kmeans_max_iterations,
        )?;

        let mut clusters: Vec<Cluster> = result
            .centroids
            .into_iter()
            .enumerate()
            .map(|(label, centroid)| Cluster {
                label,
                centroid,
                members: Vec::new(),
            })
            .collect();
        for (record, &label) in records.iter().zip(&result.assignments) {
            clusters[label].members.push(record.id.clone());
        }
        clusters.retain(|c| !c.members.is_empty());
        Ok(clusters)
    }

    /// Agglomerative clustering over stored records matching `filter`.
    ///
    /// Uses `clustering.similarity_threshold` when `threshold` is `None`.
    pub async fn cluster_hierarchical(
        &self,
        threshold: Option<f32>,
        filter: &MetadataFilter,
    ) -> RagResult<Vec<Cluster>> {
        let cap = self.settings.clustering.hierarchical_max_input;
        let records = self.clustering_input(filter, cap).await?;
        let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.vector.clone()).collect();
        let threshold = threshold.unwrap_or(self.settings.clustering.similarity_threshold);
        let result = hierarchical_clustering(&vectors, threshold)?;

        Ok(result
            .clusters
            .into_iter()
            .enumerate()
            .map(|(label, group)| Cluster {
                label,
                centroid: group.centroid,
                members: group
                    .members
                    .into_iter()
                    .map(|index| records[index].id.clone())
                    .collect(),
            })
            .collect())
    }

    async fn clustering_input(
        &self,
        filter: &MetadataFilter,
        cap: usize,
    ) -> RagResult<Vec<VectorRecord>> {
        self.ensure_open()?;
        let mut records = self.backend.get_all(filter).await?;
        if records.len() > cap {
            warn!(
                records = records.len(),
                cap, "clustering input truncated to the oldest records"
            );
            records.truncate(cap);
        }
        Ok(records)
    }

    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            embeddings: self.embedder.cache_stats(),
            search: self.engine.cache_stats(),
        }
    }

    /// Flushes pending batches, writes a final snapshot and stops the
    /// background tasks. Further calls fail with [`RagError::Closed`].
    pub async fn close(&self) -> RagResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.cancel.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(handle) = flusher {
            if let Err(e) = handle.await {
                warn!(error = %e, "batch flusher ended abnormally");
            }
        }
        if let Some(snapshot) = &self.snapshot {
            snapshot.close().await;
        }

        let remaining = self.batch.len();
        if remaining > 0 {
            warn!(pending = remaining, "closing with unflushed items");
        }
        info!("vector store closed");
        Ok(())
    }
}

/// Builds the provider chain from the configured provider list.
///
/// Providers that cannot be constructed are skipped with a warning.
fn build_embedder(settings: &Settings, dimension: VectorDimension) -> ProviderChain {
    let config = &settings.embedding;
    let mut chain = ProviderChain::new(
        dimension,
        config.provider_timeout(),
        config.cache_capacity,
        settings.search.evict_fraction,
    );

    for name in &config.providers {
        let provider = match name.as_str() {
            "openai" => match config.openai_api_key() {
                Some(key) => {
                    OpenAiProvider::new(key, &config.openai_model, config.provider_timeout())
                        .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>)
                }
                None => Err(ProviderError::NotConfigured(name.clone())),
            },
            "ollama" => OllamaProvider::new(
                &config.ollama_url,
                &config.ollama_model,
                config.provider_timeout(),
            )
            .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>),
            other => Err(ProviderError::NotConfigured(other.to_string())),
        };
        match provider {
            Ok(provider) => chain = chain.with_provider(provider),
            Err(e) => warn!(provider = %name, error = %e, "skipping embedding provider"),
        }
    }
    chain
}

/// Parses `key=value` pairs into a filter. Values are read as JSON when
/// possible (`page=2`, `draft=false`) and as plain strings otherwise.
pub fn parse_filter<'a, I>(pairs: I) -> RagResult<MetadataFilter>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut filter = MetadataFilter::new();
    for pair in pairs {
        let (key, raw) = pair.split_once('=').ok_or_else(|| RagError::General(format!(
            "invalid filter '{pair}', expected key=value"
        )))?;
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        filter.insert(key.trim(), value);
    }
    filter.validate()?;
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.data_dir = dir.path().to_path_buf();
        settings.store.snapshot_debounce_ms = 10;
        settings.batch.flush_interval_ms = 3_600_000;
        settings
    }

    #[tokio::test]
    async fn test_embed_fills_metadata() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();

        let record = store
            .embed("rust vector search", Metadata::default().with_extra("cat", "a"))
            .await
            .unwrap();
        assert_eq!(record.vector.len(), 300);
        assert_eq!(record.metadata.text.as_deref(), Some("rust vector search"));
        assert_eq!(record.metadata.provider.as_deref(), Some("local"));
        assert!(record.metadata.timestamp.is_some());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_vectors, 1);
        assert_eq!(stats.dimension, 300);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_search_caches_and_mutation_invalidates() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();
        store.embed("sourdough bread baking", Metadata::default()).await.unwrap();
        store.embed("vector similarity search", Metadata::default()).await.unwrap();

        let filter = MetadataFilter::new();
        let first = store
            .search("similarity search", 1, &filter, SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(first[0].text, "vector similarity search");

        store
            .search("similarity search", 1, &filter, SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(store.cache_stats().search.hits, 1);

        store.embed("another document", Metadata::default()).await.unwrap();
        assert_eq!(store.cache_stats().search.entries, 0);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_top_k_and_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();
        let filter = MetadataFilter::new();

        assert!(store.search("anything", 5, &filter, SearchOptions::default()).await.unwrap().is_empty());
        store.embed("something stored", Metadata::default()).await.unwrap();
        assert!(store.search("something", 0, &filter, SearchOptions::default()).await.unwrap().is_empty());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();
        let record = store.embed("to be removed", Metadata::default()).await.unwrap();

        assert!(store.delete_vector(&record.id).await.unwrap());
        assert!(!store.delete_vector(&record.id).await.unwrap());
        assert_eq!(store.stats().await.unwrap().dimension, 0);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_ingest_chunks_and_flushes() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();

        let doc = "first paragraph about vectors\n\nsecond paragraph about clusters";
        let queued = store
            .ingest(doc, Metadata::default().with_extra("doc", "d1"), 35)
            .unwrap();
        assert_eq!(queued, 2);
        assert_eq!(store.pending(), 2);

        assert_eq!(store.flush().await.unwrap(), FlushOutcome::Flushed(2));
        let filter = MetadataFilter::new().with("doc", "d1");
        let records = store.get_all_vectors(&filter).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].metadata.get("chunk_index"), Some(serde_json::json!(1)));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_persists_and_reopen_restores() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();
        let record = store.embed("persist me", Metadata::default()).await.unwrap();
        store.enqueue("queued before close", Metadata::default()).unwrap();
        store.close().await.unwrap();
        assert!(matches!(store.stats().await, Err(RagError::Closed)));

        let reopened = RagStore::init(settings(&dir)).unwrap();
        assert_eq!(reopened.stats().await.unwrap().total_vectors, 2);
        assert!(reopened.get_vector(&record.id).await.unwrap().is_some());
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cluster_views() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();
        for (id, vector) in [("a", vec![1.0, 0.0]), ("b", vec![0.99, 0.05]), ("c", vec![0.0, 1.0])] {
            store
                .upsert(VectorRecord {
                    id: VectorId::new(id),
                    vector,
                    metadata: Metadata::default(),
                })
                .await
                .unwrap();
        }

        let filter = MetadataFilter::new();
        let clusters = store.cluster_hierarchical(Some(0.9), &filter).await.unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![VectorId::new("a"), VectorId::new("b")]);

        let clusters = store.cluster_kmeans(2, &filter).await.unwrap();
        let total: usize = clusters.iter().map(|c| c.members.len()).sum();
        assert_eq!(total, 3);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fallback_embeddings_match_reloaded_dimension() {
        let dir = TempDir::new().unwrap();
        let store = RagStore::init(settings(&dir)).unwrap();
        store
            .upsert(VectorRecord {
                id: VectorId::new("wide"),
                vector: vec![0.5; 8],
                metadata: Metadata::default(),
            })
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = RagStore::init(settings(&dir)).unwrap();
        let record = reopened
            .embed("local text", Metadata::default())
            .await
            .unwrap();
        assert_eq!(record.vector.len(), 8);
        let results = reopened
            .search("local text", 5, &MetadataFilter::new(), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_hierarchical_input_is_capped() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir);
        settings.clustering.hierarchical_max_input = 2;
        let store = RagStore::init(settings).unwrap();
        for (id, vector) in [("a", vec![1.0, 0.0]), ("b", vec![0.9, 0.1]), ("c", vec![0.8, 0.2])] {
            store
                .upsert(VectorRecord {
                    id: VectorId::new(id),
                    vector,
                    metadata: Metadata::default(),
                })
                .await
                .unwrap();
        }

        let filter = MetadataFilter::new();
        let clusters = store.cluster_hierarchical(Some(-1.0), &filter).await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![VectorId::new("a"), VectorId::new("b")]);

        // K-means keeps the wider cap
        let clusters = store.cluster_kmeans(1, &filter).await.unwrap();
        assert_eq!(clusters[0].members.len(), 3);
        store.close().await.unwrap();
    }

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter(["cat=a", "page=2", "draft=false"]).unwrap();
        let metadata = Metadata::default()
            .with_extra("cat", "a")
            .with_extra("page", 2)
            .with_extra("draft", false);
        assert!(filter.matches(&metadata));

        assert!(parse_filter(["novalue"]).is_err());
        assert!(parse_filter(["obj={\"a\":1}"]).is_err());
    }
}
