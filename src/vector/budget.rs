//! Resource budget: turns the configured memory and worker ceilings into the
//! concrete limits used by index builds and queries.
//!
//! A budget is derived from one applied configuration snapshot and never
//! changes afterwards, so an in-flight build or query keeps the limits it
//! started with even if the configuration is re-applied meanwhile.

use std::mem::size_of;

use crate::config::ResourceSnapshot;
use crate::vector::types::{PartitionId, VectorDimension, VectorError, VectorId};

/// Assignment shards smaller than this are not worth a worker of their own.
const MIN_SHARD_SIZE: usize = 1024;

/// Fixed bookkeeping per sampled vector on top of its components
/// (id plus current assignment).
const SAMPLE_OVERHEAD_BYTES: u64 = (size_of::<VectorId>() + size_of::<u32>()) as u64;

/// Bytes held per vector while shard accumulators are alive.
const ASSIGNMENT_BYTES_PER_VECTOR: u64 = (size_of::<VectorId>() + size_of::<PartitionId>()) as u64;

/// Concrete limits for one build or query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    config_version: u64,
    memory_limit_bytes: u64,
    build_workers: usize,
    query_workers_per_probe: usize,
    available_cpus: usize,
}

impl ResourceBudget {
    /// Derives the budget from an applied configuration snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &ResourceSnapshot) -> Self {
        let config = &snapshot.config;
        // The build worker count is capped by the maintenance ceiling; zero
        // workers means the caller's thread does all the work.
        let build_workers = config
            .max_parallel_build_workers
            .min(config.max_parallel_maintenance_workers)
            .max(1);

        Self {
            config_version: snapshot.version,
            memory_limit_bytes: config.maintenance_memory_mb.saturating_mul(1024 * 1024),
            build_workers,
            query_workers_per_probe: config.max_parallel_query_workers_per_probe.max(1),
            available_cpus: num_cpus::get().max(1),
        }
    }

    /// Version of the configuration snapshot this budget was derived from.
    #[must_use]
    pub fn config_version(&self) -> u64 {
        self.config_version
    }

    #[must_use]
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
    }

    #[must_use]
    pub fn build_workers(&self) -> usize {
        self.build_workers
    }

    /// Bytes held by the centroid set during training (current and next
    /// iteration plus per-centroid counters).
    #[must_use]
    pub fn centroid_bytes(lists: usize, dimension: VectorDimension) -> u64 {
        let per_centroid = (dimension.get() * size_of::<f32>()) as u64;
        lists as u64 * (2 * per_centroid + size_of::<usize>() as u64)
    }

    #[must_use]
    pub fn bytes_per_sample(dimension: VectorDimension) -> u64 {
        (dimension.get() * size_of::<f32>()) as u64 + SAMPLE_OVERHEAD_BYTES
    }

    /// Number of vectors to train centroids on.
    ///
    /// The sample is `samples_per_list * lists` vectors, or the whole store
    /// when it is smaller, further capped by what fits in the memory budget
    /// once the centroids themselves are accounted for. Fails fast with
    /// `ResourceExhausted` when not even one vector per partition fits.
    pub fn sample_size(
        &self,
        store_len: usize,
        lists: usize,
        dimension: VectorDimension,
        samples_per_list: usize,
    ) -> Result<usize, VectorError> {
        let centroid_bytes = Self::centroid_bytes(lists, dimension);
        let per_sample = Self::bytes_per_sample(dimension);
        let minimum = centroid_bytes + per_sample * lists as u64;
        if minimum > self.memory_limit_bytes {
            return Err(VectorError::ResourceExhausted {
                what: "training sample",
                needed_bytes: minimum,
                limit_bytes: self.memory_limit_bytes,
            });
        }

        let cap = ((self.memory_limit_bytes - centroid_bytes) / per_sample) as usize;
        let desired = store_len.min(samples_per_list.max(1).saturating_mul(lists));
        Ok(desired.min(cap))
    }

    /// Checks that the shard accumulators for `vector_count` vectors fit.
    pub fn check_assignment_buffers(&self, vector_count: usize) -> Result<(), VectorError> {
        let needed = vector_count as u64 * ASSIGNMENT_BYTES_PER_VECTOR;
        if needed > self.memory_limit_bytes {
            return Err(VectorError::ResourceExhausted {
                what: "assignment buffers",
                needed_bytes: needed,
                limit_bytes: self.memory_limit_bytes,
            });
        }
        Ok(())
    }

    /// Number of assignment shards: the smaller of the configured worker
    /// count, the CPU count and the number of shards worth creating.
    #[must_use]
    pub fn shard_count(&self, vector_count: usize) -> usize {
        let useful = vector_count.div_ceil(MIN_SHARD_SIZE).max(1);
        self.build_workers.min(self.available_cpus).min(useful)
    }

    /// Partition scans a single query may run concurrently.
    #[must_use]
    pub fn scan_parallelism(&self, probes: usize) -> usize {
        self.query_workers_per_probe
            .min(self.available_cpus)
            .min(probes)
            .max(1)
    }
}
