//! Local TF-IDF embedding generator.
//!
//! Produces fixed-dimension vectors without any network access. Each token
//! maps to a pseudo-random unit vector seeded from the SHA-256 of the token,
//! so the same token always yields the same vector. A document vector is the
//! TF-IDF weighted sum of its token vectors, L2-normalized.
//!
//! IDF values come from a [`Vocabulary`] that callers grow explicitly with
//! [`LocalEmbeddingGenerator::update_vocabulary`]. Until then every token has
//! an IDF of 1 and the generator degrades to plain term frequency.
//!
//! # Determinism
//! For a fixed vocabulary, embedding the same text twice gives bit-identical
//! output. The only exception is a text whose tokens all carry zero weight,
//! which falls back to a random unit vector.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::vector::{VectorDimension, normalize_vector};

/// Words dropped before weighting.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "who", "did", "get", "she",
    "use", "this", "that", "with", "have", "from", "they", "been", "were", "said", "each",
    "which", "their", "will", "about", "would", "there", "what", "when", "your", "than", "them",
    "then", "these", "some", "into", "only", "also",
];

/// Tokens of this length or shorter are dropped.
const MIN_TOKEN_LEN: usize = 2;

/// Lowercases, strips punctuation and splits `text` into weighted tokens.
///
/// Tokens of two characters or fewer and stop words are removed.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() > MIN_TOKEN_LEN)
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Document frequencies collected from vocabulary updates.
#[derive(Debug, Default, Clone)]
pub struct Vocabulary {
    document_count: usize,
    document_frequency: HashMap<String, usize>,
}

impl Vocabulary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts each text as one document.
    pub fn update<S: AsRef<str>>(&mut self, texts: &[S]) {
        for text in texts {
            let unique: HashSet<String> = tokenize(text.as_ref()).into_iter().collect();
            for token in unique {
                *self.document_frequency.entry(token).or_insert(0) += 1;
            }
            self.document_count += 1;
        }
    }

    /// Smoothed inverse document frequency. Unseen tokens get 1.
    #[must_use]
    pub fn idf(&self, token: &str) -> f32 {
        match self.document_frequency.get(token) {
            Some(&df) if df > 0 => {
                let n = self.document_count as f32;
                ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0
            }
            _ => 1.0,
        }
    }

    /// Number of distinct tokens seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.document_frequency.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.document_frequency.is_empty()
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.document_count
    }
}

/// Deterministic unit vector for `token`.
#[must_use]
pub fn token_vector(token: &str, dimension: usize) -> Vec<f32> {
    let digest = Sha256::digest(token.to_lowercase().as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    let mut rng = StdRng::from_seed(seed);
    let mut vector: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
    normalize_vector(&mut vector);
    vector
}

/// Embedding generator that needs no external service.
#[derive(Debug)]
pub struct LocalEmbeddingGenerator {
    dimension: VectorDimension,
    vocabulary: RwLock<Vocabulary>,
}

impl LocalEmbeddingGenerator {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            vocabulary: RwLock::new(Vocabulary::new()),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Adds `texts` to the IDF statistics.
    pub fn update_vocabulary<S: AsRef<str>>(&self, texts: &[S]) {
        let mut vocabulary = self.vocabulary.write();
        vocabulary.update(texts);
        debug!(
            documents = vocabulary.document_count(),
            terms = vocabulary.len(),
            "vocabulary updated"
        );
    }

    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.read().len()
    }

    /// Embeds a single text. Never fails.
    #[must_use]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_with_dimension(text, self.dimension.get())
    }

    /// Embeds a single text into `dimension` components instead of the
    /// generator's own, so fallback vectors can match an established store.
    #[must_use]
    pub fn embed_with_dimension(&self, text: &str, dimension: usize) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vec![0.0; dimension];
        }

        // Term frequency in first-seen order keeps the summation order fixed
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for token in &tokens {
            match counts.iter_mut().find(|(t, _)| *t == token.as_str()) {
                Some((_, count)) => *count += 1,
                None => counts.push((token.as_str(), 1)),
            }
        }

        let total = tokens.len() as f32;
        let vocabulary = self.vocabulary.read();
        let mut embedding = vec![0.0f32; dimension];
        let mut total_weight = 0.0f32;
        for (token, count) in counts {
            let weight = (count as f32 / total) * vocabulary.idf(token);
            total_weight += weight;
            for (slot, value) in embedding.iter_mut().zip(token_vector(token, dimension)) {
                *slot += weight * value;
            }
        }
        drop(vocabulary);

        if total_weight <= 0.0 || !total_weight.is_finite() || !normalize_vector(&mut embedding) {
            debug!("zero-weight embedding, using random fallback");
            return random_unit_vector(dimension);
        }
        embedding
    }

    /// Embeds several texts in order.
    #[must_use]
    pub fn generate_embeddings(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

fn random_unit_vector(dimension: usize) -> Vec<f32> {
    let mut rng = rand::rng();
    loop {
        let mut vector: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
        if normalize_vector(&mut vector) || dimension == 0 {
            return vector;
        }
    }
}
