//! Error types for the catalog boundary
//!
//! Index internals report [`VectorError`]; the catalog wraps those and adds
//! the errors that only exist at the boundary (unknown tables, conflicting
//! index definitions). Every error carries a stable status code and recovery
//! suggestions for callers that surface them to users.

use thiserror::Error;

use crate::vector::{DistanceMetric, VectorError};

/// Errors returned by [`crate::catalog::Catalog`] operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Vector capability is not enabled\nSuggestion: Call enable_vector_capability() first")]
    CapabilityNotEnabled,

    #[error("Table '{table}' does not exist")]
    TableNotFound { table: String },

    #[error("Column '{column}' does not exist on table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error(
        "Column '{table}.{column}' is already indexed with metric {existing_metric} and lists {existing_lists}; requested metric {requested_metric} and lists {requested_lists}"
    )]
    IndexConflict {
        table: String,
        column: String,
        existing_metric: DistanceMetric,
        existing_lists: String,
        requested_metric: DistanceMetric,
        requested_lists: String,
    },

    #[error("Column '{table}.{column}' has no index")]
    IndexNotFound { table: String, column: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl CatalogError {
    /// Get a status code for this error
    pub fn status_code(&self) -> String {
        match self {
            Self::CapabilityNotEnabled => "CAPABILITY_NOT_ENABLED",
            Self::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Self::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            Self::IndexConflict { .. } => "INDEX_CONFLICT",
            Self::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Vector(error) => match error {
                VectorError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                VectorError::NotFound(_) => "VECTOR_NOT_FOUND",
                VectorError::EmptyStore => "EMPTY_STORE",
                VectorError::EmptyIndex => "EMPTY_INDEX",
                VectorError::IndexNotBuilt => "INDEX_NOT_BUILT",
                VectorError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
                VectorError::WorkerFailure { .. } => "WORKER_FAILURE",
                VectorError::Cancelled => "CANCELLED",
                VectorError::Timeout { .. } => "TIMEOUT",
                VectorError::Storage(_)
                | VectorError::InvalidFormat(_)
                | VectorError::VersionMismatch { .. }
                | VectorError::Serialization(_) => "STORAGE_ERROR",
                _ => "INVALID_PARAMETER",
            },
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::CapabilityNotEnabled => vec![
                "Enable the vector capability once at startup; enabling again is a no-op",
            ],
            Self::TableNotFound { .. } | Self::ColumnNotFound { .. } => vec![
                "Create the table and add the vector column before indexing it",
            ],
            Self::IndexConflict { .. } => vec![
                "Drop the existing index before creating one with different parameters",
                "Use reindex() to rebuild with the existing parameters",
            ],
            Self::IndexNotFound { .. } => vec!["Create an index on the column first"],
            Self::Vector(VectorError::ResourceExhausted { .. }) => vec![
                "Raise maintenance_memory_mb and apply the configuration",
                "Lower the number of lists",
            ],
            Self::Vector(VectorError::WorkerFailure { .. }) => vec![
                "The previous index is still active, so queries are unaffected",
                "Retry the build; it may succeed on retry",
            ],
            Self::Vector(VectorError::Timeout { .. }) => vec![
                "Lower probes for this query",
                "Raise query_timeout_ms in the index settings",
            ],
            Self::Vector(VectorError::EmptyStore | VectorError::EmptyIndex) => {
                vec!["Insert vectors into the column and rebuild the index"]
            }
            _ => vec![],
        }
    }
}

/// Result type alias for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CatalogError::CapabilityNotEnabled.status_code(),
            "CAPABILITY_NOT_ENABLED"
        );
        let err: CatalogError = VectorError::DimensionMismatch {
            expected: 128,
            actual: 64,
        }
        .into();
        assert_eq!(err.status_code(), "DIMENSION_MISMATCH");
        assert!(err.to_string().contains("expected 128, got 64"));
    }

    #[test]
    fn test_conflict_has_suggestions() {
        let err = CatalogError::IndexConflict {
            table: "docs".into(),
            column: "embedding".into(),
            existing_metric: DistanceMetric::Cosine,
            existing_lists: "100".into(),
            requested_metric: DistanceMetric::Euclidean,
            requested_lists: "100".into(),
        };
        assert_eq!(err.status_code(), "INDEX_CONFLICT");
        assert!(!err.recovery_suggestions().is_empty());
    }
}
