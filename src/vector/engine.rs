//! Vector index engine that orchestrates building, committing and searching.
//!
//! The engine owns a handle to the shared [`VectorStore`] and the currently
//! committed [`PartitionTable`]. Builds run against a store snapshot and
//! publish their table with a single pointer swap; queries load the pointer
//! once at start, so every query sees either the old or the new index in
//! full.
//!
//! Inserts that land while a build runs are logged and appended to the new
//! table right before it is published, so no vector misses the index it was
//! inserted under.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::vector::budget::ResourceBudget;
use crate::vector::builder::{BuildParams, IndexBuilder};
use crate::vector::partition::{IndexStats, PartitionTable};
use crate::vector::search::{QueryExecutor, SearchParams, search_exact};
use crate::vector::store::VectorStore;
use crate::vector::types::{
    DistanceMetric, Neighbor, PartitionId, VectorDimension, VectorError, VectorId,
};

/// Vector store snapshot file inside a data directory.
const STORE_FILE: &str = "vectors.ivec";

/// Partition table directory inside a data directory.
const INDEX_DIR: &str = "index";

/// An IVFFlat index over one vector store.
#[derive(Debug)]
pub struct VectorIndexEngine {
    store: Arc<VectorStore>,

    /// Committed index; `None` until the first successful build
    index: ArcSwapOption<PartitionTable>,

    /// Serializes builds so two rebuilds never race to commit
    build_lock: Mutex<()>,

    /// Ids inserted since the running build took its snapshot; `None` when
    /// no build is running
    pending: Mutex<Option<Vec<VectorId>>>,

    /// Number of committed builds
    builds: AtomicU64,
}

impl VectorIndexEngine {
    #[must_use]
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self {
            store,
            index: ArcSwapOption::empty(),
            build_lock: Mutex::new(()),
            pending: Mutex::new(None),
            builds: AtomicU64::new(0),
        }
    }

    /// Creates an engine over a fresh, empty store.
    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self::new(Arc::new(VectorStore::new(dimension)))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.store.dimension()
    }

    /// Currently committed partition table.
    #[must_use]
    pub fn table(&self) -> Option<Arc<PartitionTable>> {
        self.index.load_full()
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.index.load().is_some()
    }

    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Acquire)
    }

    /// Runs a full build and commits it.
    ///
    /// Blocks until the build finishes. On any failure the previously
    /// committed index stays in place untouched.
    pub fn build(
        &self,
        params: &BuildParams,
        budget: ResourceBudget,
        cancel: Option<CancellationToken>,
    ) -> Result<IndexStats, VectorError> {
        let mut builder = IndexBuilder::new(&self.store, budget);
        if let Some(token) = cancel {
            builder = builder.with_cancellation(token);
        }
        self.build_with(&builder, params)
    }

    fn build_with(
        &self,
        builder: &IndexBuilder<'_>,
        params: &BuildParams,
    ) -> Result<IndexStats, VectorError> {
        let _guard = self.build_lock.lock();

        // Start logging before the builder snapshots the store
        *self.pending.lock() = Some(Vec::new());
        let built = builder.build(params);

        let mut pending = self.pending.lock();
        let inserted = pending.take().unwrap_or_default();
        let table = Arc::new(built?);

        let mut replayed = 0;
        for id in inserted {
            if let Some(vector) = self.store.try_get(id)
                && !table.contains(id)
            {
                table.append(id, &vector)?;
                replayed += 1;
            }
        }
        if replayed > 0 {
            debug!("Appended {replayed} vectors inserted during the build");
        }

        let stats = table.stats();
        self.index.store(Some(table));
        drop(pending);

        let generation = self.builds.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Committed index generation {generation}: {} vectors in {} lists",
            stats.vectors, stats.lists
        );
        Ok(stats)
    }

    /// Stores a vector and, when an index is committed, appends it to the
    /// list of its nearest centroid. Returns the partition listing `id`.
    ///
    /// Overwriting an id that is already listed leaves its list membership
    /// as is; a rebuild re-partitions it.
    pub fn insert(&self, id: VectorId, vector: &[f32]) -> Result<Option<PartitionId>, VectorError> {
        self.store.insert(id, vector)?;

        let table = {
            let mut pending = self.pending.lock();
            if let Some(log) = pending.as_mut() {
                log.push(id);
            }
            self.index.load_full()
        };
        match table {
            Some(table) => table.append(id, vector).map(Some),
            None => Ok(None),
        }
    }

    /// Removes a vector from the store. Lists keep the id until the next
    /// rebuild; queries skip it.
    pub fn delete(&self, id: VectorId) -> bool {
        self.store.delete(id)
    }

    /// Approximate search against the committed index.
    pub fn search(
        &self,
        query: &[f32],
        params: SearchParams,
        budget: ResourceBudget,
    ) -> Result<Vec<Neighbor>, VectorError> {
        let table = self.index.load_full().ok_or(VectorError::IndexNotBuilt)?;
        QueryExecutor::new(&table, &self.store, budget).search(query, params)
    }

    /// Exact search over the whole store, using the committed index's metric.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorError> {
        let metric = self
            .index
            .load_full()
            .map_or(DistanceMetric::default(), |table| table.metric());
        search_exact(&self.store, metric, query, k)
    }

    #[must_use]
    pub fn stats(&self) -> Option<IndexStats> {
        self.index.load_full().map(|table| table.stats())
    }

    /// Discards the committed index. Returns whether one existed.
    pub fn drop_index(&self) -> bool {
        let _guard = self.build_lock.lock();
        self.index.swap(None).is_some()
    }

    /// Saves the store and, if built, the index under `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), VectorError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        self.store.save(dir.join(STORE_FILE))?;

        let index_dir = dir.join(INDEX_DIR);
        match self.index.load_full() {
            Some(table) => table.save(&index_dir)?,
            None if index_dir.exists() => std::fs::remove_dir_all(&index_dir)?,
            None => {}
        }
        debug!("Saved engine to {}", dir.display());
        Ok(())
    }

    /// Loads an engine saved with [`Self::save`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, VectorError> {
        let dir = dir.as_ref();
        let store = VectorStore::open(dir.join(STORE_FILE))?;
        let engine = Self::new(Arc::new(store));

        let index_dir = dir.join(INDEX_DIR);
        if PartitionTable::exists(&index_dir) {
            let table = PartitionTable::load(&index_dir)?;
            if table.dimension() != engine.dimension() {
                return Err(VectorError::DimensionMismatch {
                    expected: engine.dimension().get(),
                    actual: table.dimension().get(),
                });
            }
            engine.index.store(Some(Arc::new(table)));
        }
        info!(
            "Loaded engine from {}: {} vectors, index {}",
            dir.display(),
            engine.store.len(),
            if engine.is_built() { "present" } else { "absent" }
        );
        Ok(engine)
    }

    /// Whether `dir` holds a saved engine.
    #[must_use]
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(STORE_FILE).exists()
    }
}
