//! Text embedding with provider fallback.
//!
//! [`ProviderChain`] tries each configured [`EmbeddingProvider`] in order,
//! bounding every call with a timeout, and falls back to the
//! [`LocalEmbeddingGenerator`] when none of them succeeds. Provider failures
//! are logged and never reach the caller.
//!
//! The chain pins the dimension of the first vector it hands out (or the one
//! an existing store already uses), and local fallback vectors are produced
//! at that dimension. A provider outage therefore never changes the shape of
//! the vectors a store receives.

mod local;
mod provider;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

pub use local::{LocalEmbeddingGenerator, Vocabulary, token_vector, tokenize};
pub use provider::{EmbeddingProvider, OllamaProvider, OpenAiProvider, ProviderError};

use crate::vector::{BoundedCache, CacheStats, VectorDimension, content_hash};

/// Provider name recorded for vectors from the local generator.
pub const LOCAL_PROVIDER: &str = "local";

/// A computed embedding and the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub provider: String,
}

/// Ordered embedding strategies ending in the local generator.
pub struct ProviderChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    local: LocalEmbeddingGenerator,
    timeout: Duration,
    cache: Mutex<BoundedCache<String, Embedding>>,
    /// Zero until the first vector fixes it
    pinned_dimension: AtomicUsize,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderChain")
            .field("providers", &names)
            .field("timeout", &self.timeout)
            .field("dimension", &self.dimension())
            .finish_non_exhaustive()
    }
}

impl ProviderChain {
    /// Creates a chain with only the local generator.
    #[must_use]
    pub fn new(
        dimension: VectorDimension,
        timeout: Duration,
        cache_capacity: usize,
        evict_fraction: f32,
    ) -> Self {
        Self {
            providers: Vec::new(),
            local: LocalEmbeddingGenerator::new(dimension),
            timeout,
            cache: Mutex::new(BoundedCache::new(cache_capacity, evict_fraction)),
            pinned_dimension: AtomicUsize::new(0),
        }
    }

    /// Appends a provider; earlier providers are preferred.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    #[must_use]
    pub fn local(&self) -> &LocalEmbeddingGenerator {
        &self.local
    }

    /// Fixes the dimension of local fallback vectors, unless one is already
    /// pinned. Returns the dimension in effect.
    pub fn pin_dimension(&self, dimension: usize) -> usize {
        if dimension == 0 {
            return self.dimension();
        }
        match self.pinned_dimension.compare_exchange(
            0,
            dimension,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => dimension,
            Err(current) => current,
        }
    }

    /// Dimension of vectors from the local fallback: the pinned one, or the
    /// generator's own before anything was pinned.
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self.pinned_dimension.load(Ordering::Acquire) {
            0 => self.local.dimension().get(),
            pinned => pinned,
        }
    }

    /// Embeds `text`, memoized by content hash. Never fails.
    ///
    /// Results from the local fallback are not cached while external
    /// providers are configured, so a recovered provider is used again on
    /// the next call.
    pub async fn embed(&self, text: &str) -> Embedding {
        let key = content_hash(text);
        if let Some(cached) = self.cache.lock().get(&key) {
            return cached;
        }

        let (embedding, cacheable) = match self.embed_with_providers(text).await {
            Some(embedding) => {
                let pinned = self.pin_dimension(embedding.vector.len());
                if pinned != embedding.vector.len() {
                    warn!(
                        provider = %embedding.provider,
                        expected = pinned,
                        actual = embedding.vector.len(),
                        "provider dimension differs from the pinned dimension"
                    );
                }
                (embedding, true)
            }
            None => {
                let dimension = self.dimension();
                if dimension != self.local.dimension().get() {
                    debug!(dimension, "local fallback at pinned dimension");
                }
                (
                    Embedding {
                        vector: self.local.embed_with_dimension(text, dimension),
                        provider: LOCAL_PROVIDER.to_string(),
                    },
                    self.providers.is_empty(),
                )
            }
        };

        if cacheable {
            self.cache.lock().insert(key, embedding.clone());
        }
        embedding
    }

    async fn embed_with_providers(&self, text: &str) -> Option<Embedding> {
        for provider in &self.providers {
            match self.call_provider(provider.as_ref(), text).await {
                Ok(vector) => {
                    debug!(provider = provider.name(), "embedded with provider");
                    return Some(Embedding {
                        vector,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "embedding provider failed, trying next");
                }
            }
        }
        None
    }

    async fn call_provider(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
    ) -> Result<Vec<f32>, ProviderError> {
        let vector = tokio::time::timeout(self.timeout, provider.embed(text))
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: provider.name(),
                ms: self.timeout.as_millis() as u64,
            })??;
        if vector.is_empty() {
            return Err(ProviderError::InvalidResponse {
                provider: provider.name(),
                reason: "empty embedding".to_string(),
            });
        }
        Ok(vector)
    }

    /// Grows the local IDF vocabulary and drops cached embeddings, which
    /// may have been computed with the old weights.
    pub fn update_vocabulary<S: AsRef<str>>(&self, texts: &[S]) {
        self.local.update_vocabulary(texts);
        self.cache.lock().clear();
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }
}

/// Splits `text` into paragraph-aligned chunks of at most `max_chars`
/// characters where possible.
///
/// Paragraphs (separated by blank lines) are packed greedily. A single
/// paragraph longer than `max_chars` is split on whitespace; a single word
/// longer than `max_chars` becomes its own chunk.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let pieces = if paragraph.chars().count() > max_chars {
            split_words(paragraph, max_chars)
        } else {
            vec![paragraph.to_string()]
        };

        for piece in pieces {
            let needed = current.chars().count() + piece.chars().count() + 2;
            if !current.is_empty() && needed > max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_words(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
