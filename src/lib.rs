//! The main library module for ragstore

pub mod batch;
pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod service;
pub mod snapshot;
pub mod vector;

// Explicit exports for better API clarity
pub use batch::{BatchQueue, BatchSink, FlushOutcome, PendingItem};
pub use config::Settings;
pub use embedding::{Embedding, LocalEmbeddingGenerator, ProviderChain, chunk_text};
pub use error::{ErrorContext, RagError, RagResult};
pub use service::{CacheReport, Cluster, RagStore, parse_filter};
pub use vector::{
    Metadata, MetadataFilter, SearchOptions, SearchResult, StoreStats, VectorId, VectorRecord,
};
