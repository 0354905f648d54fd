//! Type-safe wrappers and core types for the IVFFlat index.
//!
//! Identifiers are newtypes rather than bare integers so that vector ids and
//! partition ids can never be mixed up at call sites.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque, unique identifier of a stored vector.
///
/// Uses `NonZeroU32` internally so that zero can never be confused with an
/// uninitialized slot in the on-disk formats.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct VectorId(NonZeroU32);

impl VectorId {
    /// Creates a new `VectorId` from a non-zero u32.
    ///
    /// Returns `None` if the provided ID is zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.get().to_le_bytes()
    }

    /// Creates from little-endian bytes.
    ///
    /// Returns `None` if the bytes represent zero.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::new(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense partition identifier in `0..lists`.
///
/// Doubles as the index into the centroid arena and the inverted-list table,
/// so no back-pointers between the two are needed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct PartitionId(u32);

impl PartitionId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Position of this partition in the centroid arena.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for PartitionId {
    fn from(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Every vector in a store, every centroid and every query must match the
/// dimension it was created with; mismatches are rejected, never padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Distance metric, fixed per index at creation.
///
/// All metrics are expressed as distances: lower means closer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`; vectors are compared through their unit-normalized form.
    #[default]
    Cosine,
    /// L2 distance.
    Euclidean,
    /// Negated dot product.
    InnerProduct,
}

impl DistanceMetric {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" | "vector_cosine_ops" => Ok(Self::Cosine),
            "euclidean" | "l2" | "vector_l2_ops" => Ok(Self::Euclidean),
            "inner_product" | "ip" | "dot" | "vector_ip_ops" => Ok(Self::InnerProduct),
            other => Err(VectorError::InvalidParameter(format!(
                "unknown distance metric '{other}' (expected cosine, euclidean or inner_product)"
            ))),
        }
    }
}

/// A single search hit: vector id plus its exact distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: VectorId,
    pub distance: f32,
}

/// Errors that can occur during vector index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Vector not found: ID {0}\nSuggestion: Verify the vector was inserted into the store")]
    NotFound(VectorId),

    #[error("Vector store is empty\nSuggestion: Insert vectors before building an index")]
    EmptyStore,

    #[error(
        "Index has no indexed vectors\nSuggestion: Rebuild the index after inserting vectors into the store"
    )]
    EmptyIndex,

    #[error("Index has not been built\nSuggestion: Build the index before searching")]
    IndexNotBuilt,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(
        "Cannot train {lists} partitions from {available} vectors\nSuggestion: Lower `lists` or insert more vectors (see suggested_lists)"
    )]
    InsufficientVectors { lists: usize, available: usize },

    #[error(
        "Resource limit exceeded for {what}: needs {needed_bytes} bytes, limit is {limit_bytes} bytes\nSuggestion: Raise maintenance_memory_mb or lower `lists`"
    )]
    ResourceExhausted {
        what: &'static str,
        needed_bytes: u64,
        limit_bytes: u64,
    },

    #[error(
        "Assignment shard {shard} failed after {attempts} attempts: {reason}\nSuggestion: The previous index is still active; retry the build"
    )]
    WorkerFailure {
        shard: usize,
        attempts: u32,
        reason: String,
    },

    #[error("Index build was cancelled; no changes were committed")]
    Cancelled,

    #[error(
        "Search timed out after {elapsed:?} (limit {limit:?})\nSuggestion: Lower `probes` or raise the query timeout"
    )]
    Timeout { elapsed: Duration, limit: Duration },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error(
        "Serialization error: {0}\nSuggestion: Check that index data is valid and not corrupted"
    )]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_construction() {
        let id = VectorId::new(42).unwrap();
        assert_eq!(id.get(), 42);
        assert!(VectorId::new(0).is_none());
    }

    #[test]
    fn test_vector_id_bytes() {
        let id = VectorId::new(12345).unwrap();
        assert_eq!(VectorId::from_bytes(id.to_bytes()), Some(id));
        assert_eq!(VectorId::from_bytes([0; 4]), None);
    }

    #[test]
    fn test_partition_id_is_dense_index() {
        let p = PartitionId::from(7usize);
        assert_eq!(p.get(), 7);
        assert_eq!(p.index(), 7);
        assert!(PartitionId::new(0) < PartitionId::new(1));
    }

    #[test]
    fn test_vector_dimension() {
        let dim = VectorDimension::new(128).unwrap();
        assert_eq!(dim.get(), 128);
        assert!(VectorDimension::new(0).is_err());

        assert!(dim.validate_vector(&vec![0.1; 128]).is_ok());
        assert!(matches!(
            dim.validate_vector(&vec![0.1; 64]),
            Err(VectorError::DimensionMismatch {
                expected: 128,
                actual: 64
            })
        ));
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!(
            "vector_ip_ops".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::InnerProduct
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::InnerProduct.to_string(), "inner_product");
    }
}
