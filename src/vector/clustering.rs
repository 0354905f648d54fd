//! K-means clustering used to train IVFFlat partition centroids.
//!
//! # Algorithm Details
//! - Initialization: K-means++ driven by a seeded RNG, so training is
//!   reproducible for a given sample and seed
//! - Iteration: Lloyd's algorithm under the index metric; for cosine the
//!   points and centroids are unit-normalized
//! - Ties on exactly equal distances go to the lowest partition id
//! - Centroids left without members are reseeded from the farthest
//!   currently-assigned point of a partition that can spare one
//! - Stops when the fraction of reassigned points falls to the convergence
//!   threshold or when the iteration cap is reached
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - The assignment step runs on the current rayon pool

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::vector::distance::euclidean_distance_squared;
use crate::vector::types::{DistanceMetric, PartitionId, VectorError};

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Training parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    /// Number of centroids to train.
    pub k: usize,
    pub metric: DistanceMetric,
    pub max_iterations: usize,
    /// Fraction of points allowed to change partition in a converged iteration.
    pub convergence_threshold: f32,
    pub seed: u64,
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, indexed by partition id.
    pub centroids: Vec<Vec<f32>>,

    /// Partition of each input vector, in input order.
    pub assignments: Vec<PartitionId>,

    pub iterations: usize,

    /// Whether the reassignment rate dropped below the threshold.
    pub converged: bool,

    /// Number of times an empty centroid was reseeded.
    pub reseeded: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are inserted before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {k} for {available} vectors\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount { k: usize, available: usize },

    #[error(
        "Dimension mismatch in vectors: expected {expected}, got {actual}\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<ClusteringError> for VectorError {
    fn from(error: ClusteringError) -> Self {
        match error {
            ClusteringError::EmptyVectorSet => VectorError::EmptyStore,
            ClusteringError::InvalidClusterCount { k, available } => {
                VectorError::InsufficientVectors {
                    lists: k,
                    available,
                }
            }
            ClusteringError::DimensionMismatch { expected, actual } => {
                VectorError::DimensionMismatch { expected, actual }
            }
        }
    }
}

/// Trains `params.k` centroids on `vectors`.
///
/// # Algorithm
/// 1. Prepare points for the metric (unit-normalize for cosine)
/// 2. Initialize centroids using seeded K-means++
/// 3. Iterate until convergence or the iteration cap:
///    - Assign each point to its nearest centroid
///    - Recompute each centroid as the mean of its members, reseeding empties
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    params: &KMeansParams,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if params.k == 0 || params.k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount {
            k: params.k,
            available: vectors.len(),
        });
    }
    let dimension = vectors[0].len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    let metric = params.metric;
    let points: Vec<Vec<f32>> = vectors.iter().map(|v| metric.prepare(v)).collect();
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(&points, params.k, &mut rng);

    let mut assignments: Vec<PartitionId> = Vec::new();
    let mut iterations = 0;
    let mut converged = false;
    let mut reseeded = 0;

    loop {
        iterations += 1;

        let nearest: Vec<(PartitionId, f32)> = points
            .par_iter()
            .map(|point| nearest_centroid(point, &centroids, metric))
            .collect();

        let changed = if assignments.is_empty() {
            points.len()
        } else {
            nearest
                .iter()
                .zip(assignments.iter())
                .filter(|((new, _), old)| new != *old)
                .count()
        };
        assignments = nearest.iter().map(|(partition, _)| *partition).collect();

        let change_rate = changed as f32 / points.len() as f32;
        debug!(
            "k-means iteration {iterations}: {changed} of {} points reassigned",
            points.len()
        );

        if iterations > 1 && change_rate <= params.convergence_threshold {
            converged = true;
            break;
        }
        if iterations >= params.max_iterations.max(1) {
            break;
        }

        let distances: Vec<f32> = nearest.iter().map(|(_, distance)| *distance).collect();
        let (new_centroids, reseeds) =
            update_centroids(&points, &assignments, &distances, params.k, metric);
        centroids = new_centroids;
        reseeded += reseeds;
    }

    if !converged {
        debug!(
            "k-means stopped at the iteration cap ({}) before converging",
            params.max_iterations
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
        reseeded,
    })
}

/// Returns the nearest centroid and its distance.
///
/// Exactly equal distances resolve to the lowest partition id.
pub fn nearest_centroid(
    vector: &[f32],
    centroids: &[Vec<f32>],
    metric: DistanceMetric,
) -> (PartitionId, f32) {
    let mut best_distance = f32::INFINITY;
    let mut best = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let distance = metric.distance(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }

    (PartitionId::from(best), best_distance)
}

/// Recomputes centroids as member means and reseeds empty ones.
///
/// Returns the new centroids and how many were reseeded.
fn update_centroids(
    points: &[Vec<f32>],
    assignments: &[PartitionId],
    distances: &[f32],
    k: usize,
    metric: DistanceMetric,
) -> (Vec<Vec<f32>>, usize) {
    let dimension = points[0].len();
    let mut centroids = vec![vec![0.0f32; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (point, partition) in points.iter().zip(assignments.iter()) {
        let idx = partition.index();
        for (sum, &value) in centroids[idx].iter_mut().zip(point.iter()) {
            *sum += value;
        }
        sizes[idx] += 1;
    }

    for (centroid, &size) in centroids.iter_mut().zip(sizes.iter()) {
        if size > 0 {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            metric.finish_centroid(centroid);
        }
    }

    let empty: Vec<usize> = (0..k).filter(|&i| sizes[i] == 0).collect();
    if empty.is_empty() {
        return (centroids, 0);
    }

    // Farthest points first; equal distances by position for determinism.
    let mut candidates: Vec<usize> = (0..points.len()).collect();
    candidates.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]).then(a.cmp(&b)));

    let mut reseeded = 0;
    let mut candidates = candidates.into_iter();
    for target in empty {
        let Some(donor) = candidates.find(|&i| sizes[assignments[i].index()] > 1) else {
            break;
        };
        sizes[assignments[donor].index()] -= 1;
        sizes[target] = 1;
        centroids[target] = points[donor].clone();
        reseeded += 1;
    }

    (centroids, reseeded)
}

/// Initializes centroids using the K-means++ algorithm.
///
/// Seeding weights use squared L2 distance between prepared points, which for
/// unit-normalized cosine points is proportional to cosine distance. When all
/// remaining points coincide with chosen centroids, the lowest-indexed
/// unchosen point is taken so that exactly `k` centroids always come back.
fn initialize_centroids_kmeans_plus_plus(
    points: &[Vec<f32>],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut chosen = vec![false; points.len()];
    let mut centroids = Vec::with_capacity(k);

    let first = rng.random_range(0..points.len());
    chosen[first] = true;
    centroids.push(points[first].clone());

    let mut min_distances: Vec<f32> = points
        .iter()
        .map(|p| euclidean_distance_squared(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = min_distances.iter().sum();

        let next = if total < EPSILON {
            chosen.iter().position(|taken| !taken)
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0f32;
            let mut pick = None;
            for (i, &distance) in min_distances.iter().enumerate() {
                cumulative += distance;
                if cumulative >= target && !chosen[i] && distance > 0.0 {
                    pick = Some(i);
                    break;
                }
            }
            // Rounding can leave the target just past the last weight
            pick.or_else(|| {
                min_distances
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !chosen[*i])
                    .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
                    .map(|(i, _)| i)
            })
        };

        let Some(next) = next else {
            break;
        };
        chosen[next] = true;
        centroids.push(points[next].clone());

        for (distance, point) in min_distances.iter_mut().zip(points.iter()) {
            let candidate = euclidean_distance_squared(point, &points[next]);
            if candidate < *distance {
                *distance = candidate;
            }
        }
    }

    centroids
}
