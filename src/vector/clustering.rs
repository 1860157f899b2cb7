//! Vector math and clustering over stored embeddings.
//!
//! Two algorithms are provided, both operating purely on vectors (metadata is
//! never consulted for distance computation):
//!
//! - K-means with uniform random initialization and Euclidean assignment.
//! - Agglomerative clustering that repeatedly merges the pair of clusters with
//!   the most cosine-similar centroids.
//!
//! Both are used for grouping and visualization, not for retrieval. Each
//! round is O(n²), so callers cap the input size before calling in.
//!
//! # Degenerate input
//! Empty input yields an empty result and a single vector yields a single
//! cluster. Neither is an error.

use rand::Rng;
use thiserror::Error;
use tracing::debug;

/// Default iteration cap for K-means.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Result of a K-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Final centroids, one per cluster index.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster index for each input vector, in input order.
    pub assignments: Vec<usize>,

    /// Number of assignment passes performed.
    pub iterations: usize,
}

impl KMeansResult {
    fn empty() -> Self {
        Self {
            centroids: Vec::new(),
            assignments: Vec::new(),
            iterations: 0,
        }
    }
}

/// A group produced by agglomerative clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterGroup {
    /// Component-wise mean of all member vectors.
    pub centroid: Vec<f32>,

    /// Indices into the input slice, ascending.
    pub members: Vec<usize>,
}

/// Result of an agglomerative clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchicalResult {
    pub clusters: Vec<ClusterGroup>,

    /// Cluster index (into `clusters`) for each input vector.
    pub assignments: Vec<usize>,

    /// Number of merges performed.
    pub merges: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Dimension mismatch in vectors: expected {expected}, got {actual} at index {index}\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        index: usize,
    },
}

/// Performs K-means clustering with a thread-local random generator.
///
/// See [`kmeans_clustering_with_rng`].
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[Vec<f32>],
    k: usize,
    max_iterations: usize,
) -> Result<KMeansResult, ClusteringError> {
    kmeans_clustering_with_rng(vectors, k, max_iterations, &mut rand::rng())
}

/// Performs K-means clustering using Euclidean distance.
///
/// # Arguments
/// * `vectors` - Input vectors, all of the same dimension
/// * `k` - Number of clusters; zero is treated as one
/// * `max_iterations` - Upper bound on assignment passes
/// * `rng` - Source of randomness for centroid initialization
///
/// # Algorithm
/// 1. Sample `k` distinct input vectors uniformly as initial centroids. With
///    fewer than `k` vectors, every vector becomes its own cluster.
/// 2. Up to `max_iterations` times:
///    - Assign each vector to the nearest centroid (lowest index wins ties)
///    - Stop if no assignment changed during the pass
///    - Recompute centroids as the mean of their members; a centroid with no
///      members keeps its previous position
pub fn kmeans_clustering_with_rng<R: Rng + ?Sized>(
    vectors: &[Vec<f32>],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Ok(KMeansResult::empty());
    }
    validate_dimensions(vectors)?;

    let k = k.max(1);
    if vectors.len() < k {
        return Ok(KMeansResult {
            centroids: vectors.to_vec(),
            assignments: (0..vectors.len()).collect(),
            iterations: 0,
        });
    }

    let mut centroids: Vec<Vec<f32>> = rand::seq::index::sample(rng, vectors.len(), k)
        .into_iter()
        .map(|idx| vectors[idx].clone())
        .collect();

    // An empty vector means "no assignment yet", so the first pass always
    // counts as a change.
    let mut assignments: Vec<usize> = Vec::new();
    let mut iterations = 0;

    if max_iterations == 0 {
        assignments = assign_all(vectors, &centroids);
    }

    while iterations < max_iterations {
        iterations += 1;

        let new_assignments = assign_all(vectors, &centroids);
        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged {
            break;
        }

        update_centroids(vectors, &assignments, &mut centroids);
    }

    debug!(
        vectors = vectors.len(),
        k,
        iterations,
        "k-means finished"
    );

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Agglomerative clustering by centroid cosine similarity.
///
/// Starts from singleton clusters and repeatedly merges the most similar pair
/// of centroids while that similarity is at least `similarity_threshold`.
/// The merged centroid is the mean of all member vectors, not the mean of the
/// two previous centroids.
pub fn hierarchical_clustering(
    vectors: &[Vec<f32>],
    similarity_threshold: f32,
) -> Result<HierarchicalResult, ClusteringError> {
    if vectors.is_empty() {
        return Ok(HierarchicalResult {
            clusters: Vec::new(),
            assignments: Vec::new(),
            merges: 0,
        });
    }
    validate_dimensions(vectors)?;

    let count = vectors.len();
    let mut slots: Vec<Option<ClusterGroup>> = vectors
        .iter()
        .enumerate()
        .map(|(idx, vector)| {
            Some(ClusterGroup {
                centroid: vector.clone(),
                members: vec![idx],
            })
        })
        .collect();
    // Slot indices of live clusters, in merge-stable order
    let mut active: Vec<usize> = (0..count).collect();
    let mut similarities = SimilarityMatrix::new(vectors);
    let mut merges = 0;

    while active.len() > 1 {
        let Some((left, right, similarity)) = similarities.most_similar_pair(&active) else {
            break;
        };
        if similarity < similarity_threshold {
            break;
        }

        // right > left, so removing right keeps left's position valid
        let absorbed_slot = active.remove(right);
        let target_slot = active[left];
        let absorbed = slots[absorbed_slot]
            .take()
            .map(|group| group.members)
            .unwrap_or_default();
        if let Some(target) = slots[target_slot].as_mut() {
            target.members.extend(absorbed);
            target.members.sort_unstable();
            target.centroid = mean_of_members(vectors, &target.members);
        }
        if let Some(target) = slots[target_slot].as_ref() {
            for &other in &active {
                if other == target_slot {
                    continue;
                }
                if let Some(group) = slots[other].as_ref() {
                    similarities.set(
                        target_slot,
                        other,
                        cosine_similarity(&target.centroid, &group.centroid),
                    );
                }
            }
        }
        merges += 1;
    }

    let clusters: Vec<ClusterGroup> = active
        .iter()
        .filter_map(|&slot| slots[slot].take())
        .collect();

    let mut assignments = vec![0; vectors.len()];
    for (cluster_idx, cluster) in clusters.iter().enumerate() {
        for &member in &cluster.members {
            assignments[member] = cluster_idx;
        }
    }

    debug!(
        vectors = vectors.len(),
        clusters = clusters.len(),
        merges,
        "hierarchical clustering finished"
    );

    Ok(HierarchicalResult {
        clusters,
        assignments,
        merges,
    })
}

/// Returns the index of the centroid nearest to `vector` by Euclidean distance.
///
/// Ties resolve to the lowest index. Returns 0 for an empty centroid list.
#[must_use]
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0;

    for (idx, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = idx;
        }
    }

    best_cluster
}

/// Computes cosine similarity between two vectors.
///
/// # Returns
/// * Cosine similarity in range [-1, 1], where 1 is most similar.
///   Zero when either vector has zero norm or the lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Euclidean distance between two equal-length vectors.
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// Returns false (leaving the vector untouched) when its norm is too small.
pub fn normalize_vector(vector: &mut [f32]) -> bool {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
        true
    } else {
        false
    }
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn validate_dimensions(vectors: &[Vec<f32>]) -> Result<(), ClusteringError> {
    let expected = vectors[0].len();
    match vectors.iter().position(|v| v.len() != expected) {
        Some(index) => Err(ClusteringError::DimensionMismatch {
            expected,
            actual: vectors[index].len(),
            index,
        }),
        None => Ok(()),
    }
}

fn assign_all(vectors: &[Vec<f32>], centroids: &[Vec<f32>]) -> Vec<usize> {
    vectors
        .iter()
        .map(|vector| nearest_centroid(vector, centroids))
        .collect()
}

/// Recomputes centroids as the mean of their assigned vectors.
fn update_centroids(vectors: &[Vec<f32>], assignments: &[usize], centroids: &mut [Vec<f32>]) {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; centroids.len()];
    let mut sizes = vec![0usize; centroids.len()];

    for (vector, &cluster) in vectors.iter().zip(assignments.iter()) {
        for (sum, &value) in sums[cluster].iter_mut().zip(vector.iter()) {
            *sum += value;
        }
        sizes[cluster] += 1;
    }

    for ((centroid, sum), size) in centroids.iter_mut().zip(sums).zip(sizes) {
        // Empty cluster keeps its previous position
        if size > 0 {
            *centroid = sum.into_iter().map(|v| v / size as f32).collect();
        }
    }
}

/// Pairwise centroid similarities, updated one row per merge.
struct SimilarityMatrix {
    size: usize,
    values: Vec<f32>,
}

impl SimilarityMatrix {
    fn new(vectors: &[Vec<f32>]) -> Self {
        let size = vectors.len();
        let mut matrix = Self {
            size,
            values: vec![0.0; size * size],
        };
        for i in 0..size {
            for j in (i + 1)..size {
                matrix.set(i, j, cosine_similarity(&vectors[i], &vectors[j]));
            }
        }
        matrix
    }

    fn get(&self, a: usize, b: usize) -> f32 {
        self.values[a * self.size + b]
    }

    fn set(&mut self, a: usize, b: usize, similarity: f32) {
        self.values[a * self.size + b] = similarity;
        self.values[b * self.size + a] = similarity;
    }

    /// Positions within `active` of the most similar pair. Ties keep the
    /// first pair in scan order.
    fn most_similar_pair(&self, active: &[usize]) -> Option<(usize, usize, f32)> {
        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..active.len() {
            for j in (i + 1)..active.len() {
                let similarity = self.get(active[i], active[j]);
                if similarity.is_nan() {
                    continue;
                }
                if best.is_none_or(|(_, _, current)| similarity > current) {
                    best = Some((i, j, similarity));
                }
            }
        }
        best
    }
}

fn mean_of_members(vectors: &[Vec<f32>], members: &[usize]) -> Vec<f32> {
    let dimension = vectors[members[0]].len();
    let mut mean = vec![0.0f32; dimension];
    for &member in members {
        for (acc, &value) in mean.iter_mut().zip(vectors[member].iter()) {
            *acc += value;
        }
    }
    let count = members.len() as f32;
    for value in mean.iter_mut() {
        *value /= count;
    }
    mean
}
