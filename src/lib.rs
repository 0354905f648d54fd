//! The main library module for ivfdex
//!
//! An IVFFlat approximate nearest-neighbor index: k-means partitions a vector
//! store, queries scan only the partitions nearest to them.

pub mod catalog;
pub mod config;
pub mod error;
pub mod vector;

// Explicit exports for better API clarity
pub use catalog::{Catalog, CreateIndexOutcome, IndexDefinition};
pub use config::{ConfigRegistry, IndexConfig, ResourceConfig, ResourceSnapshot, Settings};
pub use error::{CatalogError, CatalogResult};
pub use vector::{
    BuildParams, DistanceMetric, IndexStats, Neighbor, PartitionId, ResourceBudget, SearchParams,
    VectorDimension, VectorError, VectorId, VectorIndexEngine, VectorStore,
};
