//! Catalog: the boundary through which tables, vector columns and their
//! indexes are managed.
//!
//! Statements mirror the usual SQL-side workflow of a vector extension:
//! enable the capability once, register a vector column, create an IVFFlat
//! index on it, then stage and apply resource settings. Index creation is
//! "create if not exists": repeating it with identical parameters is a no-op
//! that never triggers a second build.
//!
//! Rows are written through [`Catalog::insert`] so that an existing index
//! picks them up. Index DDL on one column is serialized; queries only read
//! the column's definition and never wait for a running build.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{ConfigRegistry, IndexConfig, ResourceConfig, ResourceSnapshot, Settings};
use crate::error::{CatalogError, CatalogResult};
use crate::vector::{
    BuildParams, DistanceMetric, IndexStats, Neighbor, PartitionId, ResourceBudget, SearchParams,
    VectorDimension, VectorError, VectorId, VectorIndexEngine,
};

/// Parameters an index was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDefinition {
    pub metric: DistanceMetric,
    /// `None` means derived from the column's cardinality at build time.
    pub lists: Option<usize>,
}

/// What a `create_index` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CreateIndexOutcome {
    Created(IndexStats),
    /// An identical index already existed; nothing was built.
    AlreadyExists,
}

#[derive(Debug)]
struct VectorColumn {
    engine: Arc<VectorIndexEngine>,
    /// Written only after a build finishes, so readers never block on one
    definition: RwLock<Option<IndexDefinition>>,
    /// Held by create/reindex/drop for their whole duration
    ddl_lock: Mutex<()>,
}

type Columns = HashMap<String, Arc<VectorColumn>>;

/// In-process registry of vector columns and their indexes.
#[derive(Debug)]
pub struct Catalog {
    capability_enabled: AtomicBool,
    tables: RwLock<HashMap<String, Columns>>,
    config: ConfigRegistry,
    index_defaults: IndexConfig,
}

impl Catalog {
    #[must_use]
    pub fn new(index_defaults: IndexConfig, resources: ResourceConfig) -> Self {
        Self {
            capability_enabled: AtomicBool::new(false),
            tables: RwLock::new(HashMap::new()),
            config: ConfigRegistry::new(resources),
            index_defaults,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.index.clone(), settings.resources)
    }

    /// Registers the vector type and distance operators.
    ///
    /// Returns `false` when the capability was already enabled.
    pub fn enable_vector_capability(&self) -> bool {
        let newly = !self.capability_enabled.swap(true, Ordering::AcqRel);
        if newly {
            info!("Vector capability enabled");
        }
        newly
    }

    #[must_use]
    pub fn is_vector_capability_enabled(&self) -> bool {
        self.capability_enabled.load(Ordering::Acquire)
    }

    /// Creates an empty table. Creating an existing table is a no-op.
    pub fn create_table(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    /// Adds a vector column of fixed `dimension` and returns its engine.
    ///
    /// Adding the same column again with the same dimension returns the
    /// existing engine.
    pub fn add_vector_column(
        &self,
        table: &str,
        column: &str,
        dimension: usize,
    ) -> CatalogResult<Arc<VectorIndexEngine>> {
        self.require_capability()?;
        let dimension = VectorDimension::new(dimension)?;

        let mut tables = self.tables.write();
        let columns = tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::TableNotFound {
                table: table.to_string(),
            })?;

        if let Some(existing) = columns.get(column) {
            let existing_dimension = existing.engine.dimension();
            if existing_dimension != dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: existing_dimension.get(),
                    actual: dimension.get(),
                }
                .into());
            }
            return Ok(Arc::clone(&existing.engine));
        }

        let engine = Arc::new(VectorIndexEngine::with_dimension(dimension));
        columns.insert(
            column.to_string(),
            Arc::new(VectorColumn {
                engine: Arc::clone(&engine),
                definition: RwLock::new(None),
                ddl_lock: Mutex::new(()),
            }),
        );
        debug!("Added vector column {table}.{column} ({} dimensions)", dimension.get());
        Ok(engine)
    }

    /// Writes a row's vector. With an index in place the vector is appended
    /// to its nearest partition, and the partition is returned.
    pub fn insert(
        &self,
        table: &str,
        column: &str,
        id: VectorId,
        vector: &[f32],
    ) -> CatalogResult<Option<PartitionId>> {
        Ok(self.column(table, column)?.engine.insert(id, vector)?)
    }

    /// Deletes a row's vector. Returns whether it existed.
    pub fn delete(&self, table: &str, column: &str, id: VectorId) -> CatalogResult<bool> {
        Ok(self.column(table, column)?.engine.delete(id))
    }

    /// Index engine of a column.
    pub fn engine(&self, table: &str, column: &str) -> CatalogResult<Arc<VectorIndexEngine>> {
        Ok(Arc::clone(&self.column(table, column)?.engine))
    }

    /// Creates an IVFFlat index on a vector column if it does not exist.
    ///
    /// - same parameters as the existing index: no-op, no build
    /// - different parameters: `IndexConflict`
    /// - otherwise: full build under the currently applied configuration
    pub fn create_index(
        &self,
        table: &str,
        column: &str,
        metric: DistanceMetric,
        lists: Option<usize>,
    ) -> CatalogResult<CreateIndexOutcome> {
        self.require_capability()?;
        let vector_column = self.column(table, column)?;
        let requested = IndexDefinition { metric, lists };

        let _ddl = vector_column.ddl_lock.lock();
        let current = *vector_column.definition.read();
        if let Some(existing) = current {
            if existing == requested {
                debug!("Index on {table}.{column} already exists; skipping build");
                return Ok(CreateIndexOutcome::AlreadyExists);
            }
            return Err(CatalogError::IndexConflict {
                table: table.to_string(),
                column: column.to_string(),
                existing_metric: existing.metric,
                existing_lists: describe_lists(existing.lists),
                requested_metric: metric,
                requested_lists: describe_lists(lists),
            });
        }

        let stats = self.build(&vector_column.engine, requested)?;
        *vector_column.definition.write() = Some(requested);
        info!("Created index on {table}.{column}: {} lists, metric {metric}", stats.lists);
        Ok(CreateIndexOutcome::Created(stats))
    }

    /// Rebuilds an existing index from the column's current contents.
    pub fn reindex(&self, table: &str, column: &str) -> CatalogResult<IndexStats> {
        let vector_column = self.column(table, column)?;
        let _ddl = vector_column.ddl_lock.lock();
        let current = *vector_column.definition.read();
        let Some(existing) = current else {
            return Err(CatalogError::IndexNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        };
        let stats = self.build(&vector_column.engine, existing)?;
        info!("Reindexed {table}.{column}");
        Ok(stats)
    }

    /// Drops the index of a column; the column's vectors are kept.
    pub fn drop_index(&self, table: &str, column: &str) -> CatalogResult<()> {
        let vector_column = self.column(table, column)?;
        let _ddl = vector_column.ddl_lock.lock();
        if vector_column.definition.write().take().is_none() {
            return Err(CatalogError::IndexNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        vector_column.engine.drop_index();
        info!("Dropped index on {table}.{column}");
        Ok(())
    }

    /// Definition of the index on a column, if any.
    pub fn index_definition(
        &self,
        table: &str,
        column: &str,
    ) -> CatalogResult<Option<IndexDefinition>> {
        Ok(*self.column(table, column)?.definition.read())
    }

    pub fn index_stats(&self, table: &str, column: &str) -> CatalogResult<IndexStats> {
        self.column(table, column)?
            .engine
            .stats()
            .ok_or_else(|| CatalogError::IndexNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Approximate k-nearest-neighbor search on an indexed column.
    ///
    /// `probes` defaults to the configured index default; the query runs
    /// under the configuration applied when it starts.
    pub fn search(
        &self,
        table: &str,
        column: &str,
        query: &[f32],
        k: usize,
        probes: Option<usize>,
    ) -> CatalogResult<Vec<Neighbor>> {
        let vector_column = self.column(table, column)?;
        if vector_column.definition.read().is_none() {
            return Err(CatalogError::IndexNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let mut params =
            SearchParams::new(k).with_probes(probes.unwrap_or(self.index_defaults.probes));
        if let Some(ms) = self.index_defaults.query_timeout_ms {
            params = params.with_timeout(Duration::from_millis(ms));
        }
        let budget = ResourceBudget::from_snapshot(&self.config.snapshot());
        Ok(vector_column.engine.search(query, params, budget)?)
    }

    /// Stages resource settings; they take effect on [`Self::apply_configuration`].
    pub fn configure(&self, config: ResourceConfig) -> CatalogResult<()> {
        if config.max_parallel_build_workers == 0
            || config.max_parallel_query_workers_per_probe == 0
            || config.max_parallel_maintenance_workers == 0
        {
            return Err(CatalogError::Config {
                reason: "worker counts must be at least 1".to_string(),
            });
        }
        self.config.configure(config);
        Ok(())
    }

    /// Applies staged settings to builds and queries started from now on.
    pub fn apply_configuration(&self) -> Arc<ResourceSnapshot> {
        self.config.apply()
    }

    /// The configuration snapshot new operations would start with.
    #[must_use]
    pub fn configuration(&self) -> Arc<ResourceSnapshot> {
        self.config.snapshot()
    }

    fn build(
        &self,
        engine: &VectorIndexEngine,
        definition: IndexDefinition,
    ) -> CatalogResult<IndexStats> {
        let params = BuildParams {
            metric: definition.metric,
            lists: definition.lists,
            ..BuildParams::from_config(&self.index_defaults)
        };
        let budget = ResourceBudget::from_snapshot(&self.config.snapshot());
        Ok(engine.build(&params, budget, None)?)
    }

    fn column(&self, table: &str, column: &str) -> CatalogResult<Arc<VectorColumn>> {
        let tables = self.tables.read();
        let columns = tables.get(table).ok_or_else(|| CatalogError::TableNotFound {
            table: table.to_string(),
        })?;
        columns
            .get(column)
            .cloned()
            .ok_or_else(|| CatalogError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    fn require_capability(&self) -> CatalogResult<()> {
        if self.is_vector_capability_enabled() {
            Ok(())
        } else {
            Err(CatalogError::CapabilityNotEnabled)
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(IndexConfig::default(), ResourceConfig::default())
    }
}

fn describe_lists(lists: Option<usize>) -> String {
    lists.map_or_else(|| "auto".to_string(), |n| n.to_string())
}
