//! Configuration module for the vector store service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RAGSTORE_` and use double
//! underscores to separate nested levels:
//! - `RAGSTORE_SEARCH__CACHE_CAPACITY=500` sets `search.cache_capacity`
//! - `RAGSTORE_EMBEDDING__PROVIDERS=[openai]` sets `embedding.providers`
//! - `RAGSTORE_DEBUG=true` sets `debug`
//!
//! `OPENAI_API_KEY` is honoured when `embedding.openai_api_key` is unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, RagError, RagResult};
use crate::vector::{DEFAULT_CACHE_CAPACITY, DEFAULT_EVICT_FRACTION, DEFAULT_VECTOR_WEIGHT};

/// Directory holding the settings file and, by default, the snapshot.
pub const CONFIG_DIR: &str = ".ragstore";

const ENV_PREFIX: &str = "RAGSTORE_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory for persisted state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Snapshot file name inside `data_dir`
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    /// Quiet period before a pending snapshot is written
    #[serde(default = "default_snapshot_debounce_ms")]
    pub snapshot_debounce_ms: u64,

    /// Retry interval after a failed snapshot write
    #[serde(default = "default_snapshot_retry_secs")]
    pub snapshot_retry_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Dimension of local embeddings
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// External providers in order of preference (`openai`, `ollama`)
    #[serde(default)]
    pub providers: Vec<String>,

    /// Timeout for a single provider call
    #[serde(default = "default_timeout_ms")]
    pub provider_timeout_ms: u64,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    /// Maximum cached embeddings
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Blend lexical overlap into scores unless the caller opts out
    #[serde(default = "default_true")]
    pub rerank: bool,

    /// Weight of the vector score; the lexical score gets the remainder
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Maximum cached result lists
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Share of cache entries dropped when the bound is exceeded
    #[serde(default = "default_evict_fraction")]
    pub evict_fraction: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BatchConfig {
    /// Pending items that trigger an immediate flush
    #[serde(default = "default_size_threshold")]
    pub size_threshold: usize,

    /// Interval of the background flush timer
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClusteringConfig {
    /// Records considered by one clustering run
    #[serde(default = "default_max_input")]
    pub max_input: usize,

    /// Records considered by one hierarchical run, which costs O(n²) per merge
    #[serde(default = "default_hierarchical_max_input")]
    pub hierarchical_max_input: usize,

    #[serde(default = "default_kmeans_max_iterations")]
    pub kmeans_max_iterations: usize,

    /// Merge threshold for hierarchical clustering
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Use the hosted index instead of the local store
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on records returned by a full scan
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR)
}
fn default_true() -> bool {
    true
}
fn default_snapshot_file() -> String {
    "vectors.json".to_string()
}
fn default_snapshot_debounce_ms() -> u64 {
    1000
}
fn default_snapshot_retry_secs() -> u64 {
    30
}
fn default_dimension() -> usize {
    crate::vector::LOCAL_VECTOR_DIMENSION
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}
fn default_top_k() -> usize {
    5
}
fn default_vector_weight() -> f32 {
    DEFAULT_VECTOR_WEIGHT
}
fn default_evict_fraction() -> f32 {
    DEFAULT_EVICT_FRACTION
}
fn default_size_threshold() -> usize {
    10
}
fn default_flush_interval_ms() -> u64 {
    5000
}
fn default_max_input() -> usize {
    2000
}
fn default_hierarchical_max_input() -> usize {
    500
}
fn default_kmeans_max_iterations() -> usize {
    crate::vector::DEFAULT_MAX_ITERATIONS
}
fn default_similarity_threshold() -> f32 {
    0.8
}
fn default_scan_limit() -> usize {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            debug: false,
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            batch: BatchConfig::default(),
            clustering: ClusteringConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_file: default_snapshot_file(),
            snapshot_debounce_ms: default_snapshot_debounce_ms(),
            snapshot_retry_secs: default_snapshot_retry_secs(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            providers: Vec::new(),
            provider_timeout_ms: default_timeout_ms(),
            openai_model: default_openai_model(),
            openai_api_key: None,
            ollama_url: default_ollama_url(),
            ollama_model: default_ollama_model(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            rerank: true,
            vector_weight: default_vector_weight(),
            cache_capacity: default_cache_capacity(),
            evict_fraction: default_evict_fraction(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_threshold: default_size_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_input: default_max_input(),
            hierarchical_max_input: default_hierarchical_max_input(),
            kmeans_max_iterations: default_kmeans_max_iterations(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            api_key: None,
            namespace: None,
            timeout_ms: default_timeout_ms(),
            scan_limit: default_scan_limit(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured key, else `OPENAI_API_KEY` from the environment.
    pub fn openai_api_key(&self) -> Option<String> {
        self.openai_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .ragstore directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for a .ragstore directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.store.snapshot_file)
    }

    /// Rejects values the store cannot run with.
    pub fn validate(&self) -> RagResult<()> {
        let invalid = |reason: String| Err(RagError::ConfigError { reason });

        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be greater than zero".to_string());
        }
        let weight = self.search.vector_weight;
        if weight.is_nan() || !(0.0..=1.0).contains(&weight) {
            return invalid(format!("search.vector_weight must be in [0, 1], got {weight}"));
        }
        let fraction = self.search.evict_fraction;
        if fraction.is_nan() || fraction <= 0.0 || fraction > 1.0 {
            return invalid(format!(
                "search.evict_fraction must be in (0, 1], got {fraction}"
            ));
        }
        if self.search.cache_capacity == 0 || self.embedding.cache_capacity == 0 {
            return invalid("cache capacities must be greater than zero".to_string());
        }
        if self.batch.size_threshold == 0 {
            return invalid("batch.size_threshold must be greater than zero".to_string());
        }
        if self.batch.flush_interval_ms == 0 {
            return invalid("batch.flush_interval_ms must be greater than zero".to_string());
        }
        if self.clustering.max_input == 0 || self.clustering.hierarchical_max_input == 0 {
            return invalid("clustering input caps must be greater than zero".to_string());
        }
        if let Some(unknown) = self
            .embedding
            .providers
            .iter()
            .find(|p| !matches!(p.as_str(), "openai" | "ollama"))
        {
            return invalid(format!(
                "unknown embedding provider '{unknown}', expected 'openai' or 'ollama'"
            ));
        }
        if self.remote.enabled && self.remote.host.trim().is_empty() {
            return invalid("remote.host is required when remote.enabled = true".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> RagResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }

        let toml_string = toml::to_string_pretty(self).context("Failed to encode settings")?;
        std::fs::write(path, toml_string).map_err(|source| RagError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }

    /// Create a default settings file with helpful comments under `root`
    pub fn init_config_file(root: impl AsRef<Path>, force: bool) -> RagResult<PathBuf> {
        let config_path = root.as_ref().join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err(RagError::ConfigError {
                reason: "Configuration file already exists. Use --force to overwrite".to_string(),
            });
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }

        std::fs::write(&config_path, DEFAULT_TEMPLATE).map_err(|source| RagError::FileWrite {
            path: config_path.clone(),
            source,
        })?;

        Ok(config_path)
    }
}

const DEFAULT_TEMPLATE: &str = r#"# ragstore configuration

# Version of the configuration schema
version = 1

# Directory for persisted state (relative to the working directory)
data_dir = ".ragstore"

# Global debug mode
debug = false

[store]
snapshot_file = "vectors.json"
# Quiet period before a snapshot is written after a change
snapshot_debounce_ms = 1000
# Retry interval after a failed snapshot write
snapshot_retry_secs = 30

[embedding]
# Dimension of the local TF-IDF embeddings
dimension = 300
# External providers in order of preference: "openai", "ollama".
# The local generator is always the last resort.
providers = []
provider_timeout_ms = 10000
openai_model = "text-embedding-3-small"
# openai_api_key = "sk-..."   (or set OPENAI_API_KEY)
ollama_url = "http://localhost:11434"
ollama_model = "nomic-embed-text"
cache_capacity = 1000

[search]
default_top_k = 5
rerank = true
# Lexical overlap gets 1 - vector_weight
vector_weight = 0.7
cache_capacity = 1000
evict_fraction = 0.5

[batch]
size_threshold = 10
flush_interval_ms = 5000

[clustering]
max_input = 2000
hierarchical_max_input = 500
kmeans_max_iterations = 100
similarity_threshold = 0.8

[remote]
# Use a hosted Pinecone-compatible index instead of the local store
enabled = false
host = ""
# api_key = "..."
# namespace = "..."
timeout_ms = 10000
scan_limit = 10000
"#;
