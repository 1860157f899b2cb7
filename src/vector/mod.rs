//! Vector storage, similarity search and clustering.
//!
//! Records pair a dense `f32` vector with [`Metadata`]. They live either in a
//! [`LocalVectorStore`] (in memory, snapshotted to JSON) or in a hosted index
//! behind [`RemoteIndexBackend`]; both are driven through [`VectorBackend`].
//!
//! # Search
//! Ranking is an exact cosine scan. [`SearchEngine`] adds an optional lexical
//! rerank and a bounded result cache on top of any backend.
//!
//! # Clustering
//! K-means and agglomerative clustering run over stored vectors for grouping
//! and visualization. They are never used to answer searches.

mod cache;
mod clustering;
mod engine;
mod metadata;
mod remote;
mod storage;
mod types;

// Re-export core types for public API
pub use cache::{
    BoundedCache, CacheStats, DEFAULT_CACHE_CAPACITY, DEFAULT_EVICT_FRACTION, content_hash,
};
pub use clustering::{
    ClusterGroup, ClusteringError, DEFAULT_MAX_ITERATIONS, HierarchicalResult, KMeansResult,
    cosine_similarity, euclidean_distance, hierarchical_clustering, kmeans_clustering,
    kmeans_clustering_with_rng, nearest_centroid, normalize_vector,
};
pub use engine::{
    DEFAULT_VECTOR_WEIGHT, SearchEngine, SearchHit, SearchOptions, SearchRequest, SearchResult,
    lexical_overlap, rank_candidates, rerank_hits,
};
pub use metadata::{Metadata, MetadataFilter};
pub use remote::{RemoteIndexBackend, RemoteIndexConfig};
pub use storage::{LocalVectorStore, VectorBackend};
pub(crate) use storage::write_atomically;
pub use types::{
    LOCAL_VECTOR_DIMENSION, Score, StoreStats, VectorDimension, VectorError, VectorId,
    VectorRecord,
};
