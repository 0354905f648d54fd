//! IVFFlat approximate nearest-neighbor index.
//!
//! Vectors live in a [`VectorStore`]. An [`IndexBuilder`] trains `lists`
//! centroids on a sample of the store and assigns every vector to its
//! nearest centroid, producing a [`PartitionTable`]. The
//! [`QueryExecutor`] ranks centroids for a query, scans the members of the
//! `probes` closest partitions with exact distances and keeps the top `k`.
//!
//! [`VectorIndexEngine`] ties these together behind an atomically swappable
//! index pointer so rebuilds never expose a partially built index.

mod budget;
mod builder;
mod clustering;
mod distance;
mod engine;
mod partition;
mod search;
mod store;
mod types;

pub use budget::ResourceBudget;
pub use builder::{BuildParams, IndexBuilder, MAX_SUGGESTED_LISTS, suggested_lists};
pub use clustering::{ClusteringError, KMeansParams, KMeansResult, kmeans_clustering, nearest_centroid};
pub use distance::{
    cosine_distance, cosine_similarity, dot_product, euclidean_distance, l2_norm, normalize,
};
pub use engine::VectorIndexEngine;
pub use partition::{BuildInfo, IndexMetadata, IndexStats, PartitionTable};
pub use search::{QueryExecutor, SearchParams, recall, search_exact};
pub use store::{SharedVector, VectorStore};
pub use types::{
    DistanceMetric, Neighbor, PartitionId, VectorDimension, VectorError, VectorId,
};
