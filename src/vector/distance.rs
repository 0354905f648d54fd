//! Distance kernels for the supported metrics.
//!
//! Every metric is expressed as a distance where lower means more similar:
//! - **Cosine**: `1 - (a · b) / (||a|| * ||b||)`, range `[0, 2]`
//! - **Euclidean**: `sqrt(sum((a[i] - b[i])^2))`
//! - **Inner product**: `-(a · b)`
//!
//! Cosine is scale invariant, so comparing raw vectors and comparing their
//! unit-normalized forms give the same answer. Centroids for cosine indexes
//! are kept normalized so that build and query agree on the geometry.

use crate::vector::types::DistanceMetric;

/// Norms below this are treated as the zero vector.
const EPSILON: f32 = 1e-10;

impl DistanceMetric {
    /// Computes the distance between two vectors of equal length.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
            Self::InnerProduct => -dot_product(a, b),
        }
    }

    /// Returns the form of `vector` used for centroid math under this metric.
    ///
    /// Cosine normalizes to unit length; the other metrics use the raw vector.
    #[must_use]
    pub fn prepare(&self, vector: &[f32]) -> Vec<f32> {
        match self {
            Self::Cosine => normalized_copy(vector),
            Self::Euclidean | Self::InnerProduct => vector.to_vec(),
        }
    }

    /// Finishes a freshly averaged centroid in place.
    pub fn finish_centroid(&self, centroid: &mut [f32]) {
        if matches!(self, Self::Cosine) {
            normalize(centroid);
        }
    }
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Squared L2 distance; avoids the sqrt when only ordering matters.
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Cosine similarity in `[-1, 1]`. Zero vectors have similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot = dot_product(a, b);
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a < EPSILON || norm_b < EPSILON {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[inline]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a near-zero norm are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[must_use]
pub fn normalized_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize(&mut normalized);
    normalized
}
