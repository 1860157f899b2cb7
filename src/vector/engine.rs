//! Similarity search engine.
//!
//! Ranking is an exhaustive cosine scan: every candidate that passes the
//! metadata filter is scored, results are ordered by descending score, and
//! ties keep insertion order (earlier records first). On top of the raw scan
//! the engine provides:
//!
//! - an optional lexical rerank that blends the vector score with the share
//!   of query tokens found in the record's source text
//! - a bounded result cache keyed by (query text, filter, top_k, rerank)

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::vector::cache::{BoundedCache, CacheStats, content_hash};
use crate::vector::clustering::cosine_similarity;
use crate::vector::{Metadata, MetadataFilter, Score, VectorBackend, VectorError, VectorId, VectorRecord};

/// Default weight of the vector score in the blended rerank score.
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;

/// A raw match returned by a backend scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: VectorId,
    pub score: Score,
    pub metadata: Metadata,
}

/// A match returned to callers of the search API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: VectorId,
    /// Final ranking score: the blended score when reranked, else the cosine.
    pub score: f32,
    /// Cosine similarity between query and record.
    pub vector_score: f32,
    /// Fraction of query tokens found in the source text, when reranked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,
    /// Source text of the record (empty when the metadata carries none).
    pub text: String,
    pub metadata: Metadata,
}

/// Per-call search switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Blend in the lexical-overlap score.
    pub rerank: bool,
    /// Ignore any cached result and recompute.
    pub skip_cache: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            rerank: true,
            skip_cache: false,
        }
    }
}

/// Scores `candidates` against `query` and keeps the best `top_k`.
///
/// Candidates must be supplied in insertion order; the sort is stable so
/// equal scores keep that order.
#[must_use]
pub fn rank_candidates<'a, I>(query: &[f32], candidates: I, top_k: usize) -> Vec<(Score, &'a VectorRecord)>
where
    I: IntoIterator<Item = &'a VectorRecord>,
{
    if top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(Score, &VectorRecord)> = candidates
        .into_iter()
        .map(|record| (Score::saturating(cosine_similarity(query, &record.vector)), record))
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(top_k);
    scored
}

/// Share of whitespace-separated query tokens that occur as substrings of
/// `text`, case-insensitively. Zero for an empty query.
#[must_use]
pub fn lexical_overlap(query: &str, text: &str) -> f32 {
    let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let matched = tokens.iter().filter(|token| haystack.contains(token.as_str())).count();
    matched as f32 / tokens.len() as f32
}

/// Converts backend hits into results, optionally reranking them.
///
/// Reranking reorders the given hits but never adds or drops any. Ties on
/// the blended score keep the vector ranking order.
pub fn rerank_hits(
    hits: Vec<SearchHit>,
    query: &str,
    rerank: bool,
    vector_weight: f32,
) -> Result<Vec<SearchResult>, VectorError> {
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let text = hit.metadata.text.clone().unwrap_or_default();
        let (score, lexical_score) = if rerank {
            let lexical = lexical_overlap(query, &text);
            let blended = hit
                .score
                .weighted_combine(Score::saturating(lexical), vector_weight)?;
            (blended.get(), Some(lexical))
        } else {
            (hit.score.get(), None)
        };
        results.push(SearchResult {
            id: hit.id,
            score,
            vector_score: hit.score.get(),
            lexical_score,
            text,
            metadata: hit.metadata,
        });
    }

    if rerank {
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
    Ok(results)
}

/// A search request as seen by the engine.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub top_k: usize,
    pub filter: &'a MetadataFilter,
    pub options: SearchOptions,
}

impl SearchRequest<'_> {
    /// Cache key over everything that affects the result list.
    #[must_use]
    pub fn cache_key(&self) -> String {
        content_hash(&format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.query,
            self.filter.cache_key(),
            self.top_k,
            self.options.rerank
        ))
    }
}

/// Search front end: backend scan, rerank and result caching.
#[derive(Debug)]
pub struct SearchEngine {
    cache: Mutex<BoundedCache<String, Vec<SearchResult>>>,
    /// Bumped under the cache lock by every invalidation
    generation: AtomicU64,
    vector_weight: f32,
}

impl SearchEngine {
    /// # Errors
    /// Returns [`VectorError::InvalidWeight`] if `vector_weight` is outside [0, 1].
    pub fn new(
        vector_weight: f32,
        cache_capacity: usize,
        evict_fraction: f32,
    ) -> Result<Self, VectorError> {
        if vector_weight.is_nan() || !(0.0..=1.0).contains(&vector_weight) {
            return Err(VectorError::InvalidWeight {
                value: vector_weight,
                reason: "Vector weight must be in range [0.0, 1.0]",
            });
        }
        Ok(Self {
            cache: Mutex::new(BoundedCache::new(cache_capacity, evict_fraction)),
            generation: AtomicU64::new(0),
            vector_weight,
        })
    }

    /// Returns a cached result list for `request`, unless it asks to skip the cache.
    pub fn lookup(&self, request: &SearchRequest<'_>) -> Option<Vec<SearchResult>> {
        if request.options.skip_cache {
            return None;
        }
        let hit = self.cache.lock().get(&request.cache_key());
        if hit.is_some() {
            debug!(query = request.query, "search cache hit");
        }
        hit
    }

    /// Runs the backend scan for an already-embedded query, reranks and
    /// caches the outcome.
    ///
    /// A result list is not cached when the store was mutated while the scan
    /// was in flight.
    pub async fn execute(
        &self,
        backend: &dyn VectorBackend,
        request: &SearchRequest<'_>,
        query_vector: &[f32],
    ) -> Result<Vec<SearchResult>, VectorError> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }

        let started = self.generation.load(Ordering::Acquire);
        let hits = backend.search(query_vector, request.top_k, request.filter).await?;
        let results = rerank_hits(hits, request.query, request.options.rerank, self.vector_weight)?;

        let mut cache = self.cache.lock();
        if self.generation.load(Ordering::Acquire) == started {
            cache.insert(request.cache_key(), results.clone());
        } else {
            debug!(query = request.query, "store changed during search, not caching");
        }
        Ok(results)
    }

    /// Drops every cached result list.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.clear();
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    #[must_use]
    pub fn vector_weight(&self) -> f32 {
        self.vector_weight
    }
}
