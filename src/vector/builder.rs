//! Index builder: trains centroids and assigns every stored vector to its
//! nearest partition.
//!
//! A build runs in three phases:
//! 1. Draw a seeded training sample sized by the resource budget
//! 2. Train `lists` centroids with k-means on a dedicated worker pool
//! 3. Assign the whole store in contiguous id-ordered shards, in parallel
//!
//! Shards cover disjoint id ranges and are merged in shard order, so the
//! resulting inverted lists are sorted by id and identical for any worker
//! count. A shard whose worker panics is retried once before the build fails.
//! Nothing is published here: the caller commits the returned table.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::vector::budget::ResourceBudget;
use crate::vector::clustering::{KMeansParams, kmeans_clustering, nearest_centroid};
use crate::vector::partition::{BuildInfo, PartitionTable, unix_timestamp};
use crate::vector::store::{SharedVector, VectorStore};
use crate::vector::types::{DistanceMetric, VectorError, VectorId};

/// Upper bound for a derived partition count.
pub const MAX_SUGGESTED_LISTS: usize = 4096;

/// Attempts per assignment shard before the build fails.
const SHARD_ATTEMPTS: u32 = 2;

/// Partition count used when none is configured: `ceil(sqrt(n))`, clamped to
/// `1..=4096`.
#[must_use]
pub fn suggested_lists(vector_count: usize) -> usize {
    let root = (vector_count as f64).sqrt().ceil() as usize;
    root.clamp(1, MAX_SUGGESTED_LISTS)
}

/// Parameters of one build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildParams {
    pub metric: DistanceMetric,
    /// Derived from the store size when `None`.
    pub lists: Option<usize>,
    pub seed: u64,
    pub max_iterations: usize,
    pub convergence_threshold: f32,
    pub samples_per_list: usize,
}

impl BuildParams {
    #[must_use]
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            metric: config.metric,
            lists: config.lists,
            seed: config.seed,
            max_iterations: config.max_iterations,
            convergence_threshold: config.convergence_threshold,
            samples_per_list: config.samples_per_list,
        }
    }
}

impl Default for BuildParams {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

/// Builds partition tables from a vector store.
#[derive(Debug)]
pub struct IndexBuilder<'a> {
    store: &'a VectorStore,
    budget: ResourceBudget,
    cancel: CancellationToken,
    #[cfg(test)]
    shard_hook: Option<ShardHook>,
}

impl<'a> IndexBuilder<'a> {
    #[must_use]
    pub fn new(store: &'a VectorStore, budget: ResourceBudget) -> Self {
        Self {
            store,
            budget,
            cancel: CancellationToken::new(),
            #[cfg(test)]
            shard_hook: None,
        }
    }

    /// Uses `token` to abort the build; a cancelled build commits nothing.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs a full build and returns the uncommitted table.
    pub fn build(&self, params: &BuildParams) -> Result<PartitionTable, VectorError> {
        let started = Instant::now();
        let dimension = self.store.dimension();
        let vectors = self.store.snapshot();
        if vectors.is_empty() {
            return Err(VectorError::EmptyStore);
        }

        let lists = params.lists.unwrap_or_else(|| suggested_lists(vectors.len()));
        if lists == 0 {
            return Err(VectorError::InvalidParameter(
                "lists must be at least 1".to_string(),
            ));
        }
        if lists > vectors.len() {
            return Err(VectorError::InsufficientVectors {
                lists,
                available: vectors.len(),
            });
        }

        let sample_size =
            self.budget
                .sample_size(vectors.len(), lists, dimension, params.samples_per_list)?;
        if sample_size < lists {
            return Err(VectorError::InsufficientVectors {
                lists,
                available: sample_size,
            });
        }
        self.budget.check_assignment_buffers(vectors.len())?;

        info!(
            "Building index: {} vectors, {} lists, metric {}, sample {}, {} workers (config v{})",
            vectors.len(),
            lists,
            params.metric,
            sample_size,
            self.budget.build_workers(),
            self.budget.config_version()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.budget.build_workers())
            .thread_name(|i| format!("ivf-build-{i}"))
            .build()
            .map_err(|e| {
                VectorError::InvalidParameter(format!("failed to start build workers: {e}"))
            })?;

        self.check_cancelled()?;
        let sample = training_sample(&vectors, sample_size, params.seed);
        let kmeans_params = KMeansParams {
            k: lists,
            metric: params.metric,
            max_iterations: params.max_iterations,
            convergence_threshold: params.convergence_threshold,
            seed: params.seed,
        };
        let trained = pool.install(|| kmeans_clustering(&sample, &kmeans_params))?;
        debug!(
            "Trained {} centroids in {} iterations (converged: {}, reseeded: {})",
            lists, trained.iterations, trained.converged, trained.reseeded
        );

        self.check_cancelled()?;
        let inverted = pool.install(|| {
            self.assign_all(&vectors, &trained.centroids, params.metric)
        })?;

        // Last chance to abort before the caller publishes the table
        self.check_cancelled()?;

        let table = PartitionTable::new(
            params.metric,
            dimension,
            trained.centroids,
            inverted,
            BuildInfo {
                seed: params.seed,
                config_version: self.budget.config_version(),
                sample_size,
                iterations: trained.iterations,
                converged: trained.converged,
                reseeded: trained.reseeded,
                built_at: unix_timestamp(),
            },
        )?;
        info!(
            "Index built in {:?}: {} vectors in {} lists",
            started.elapsed(),
            table.vector_count(),
            table.lists()
        );
        Ok(table)
    }

    /// Assigns every vector to its nearest centroid, shard by shard.
    fn assign_all(
        &self,
        vectors: &[(VectorId, SharedVector)],
        centroids: &[Vec<f32>],
        metric: DistanceMetric,
    ) -> Result<Vec<Vec<VectorId>>, VectorError> {
        let shard_count = self.budget.shard_count(vectors.len());
        let shard_size = vectors.len().div_ceil(shard_count);
        debug!("Assigning {} vectors in {shard_count} shards", vectors.len());

        let shards = vectors
            .par_chunks(shard_size)
            .enumerate()
            .map(|(shard, chunk)| self.assign_shard_with_retry(shard, chunk, centroids, metric))
            .collect::<Result<Vec<_>, VectorError>>()?;

        let mut lists: Vec<Vec<VectorId>> = vec![Vec::new(); centroids.len()];
        for shard in shards {
            for (list, members) in lists.iter_mut().zip(shard) {
                list.extend(members);
            }
        }
        Ok(lists)
    }

    fn assign_shard_with_retry(
        &self,
        shard: usize,
        chunk: &[(VectorId, SharedVector)],
        centroids: &[Vec<f32>],
        metric: DistanceMetric,
    ) -> Result<Vec<Vec<VectorId>>, VectorError> {
        let mut attempt = 0;
        loop {
            self.check_cancelled()?;
            attempt += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                #[cfg(test)]
                if let Some(hook) = &self.shard_hook {
                    (hook.0)(shard);
                }
                assign_shard(chunk, centroids, metric)
            }));
            match outcome {
                Ok(lists) => return Ok(lists),
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    if attempt >= SHARD_ATTEMPTS {
                        return Err(VectorError::WorkerFailure {
                            shard,
                            attempts: attempt,
                            reason,
                        });
                    }
                    warn!("Assignment shard {shard} failed (attempt {attempt}): {reason}; retrying");
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), VectorError> {
        if self.cancel.is_cancelled() {
            info!("Index build cancelled");
            return Err(VectorError::Cancelled);
        }
        Ok(())
    }
}

/// Seeded sample of the store, in id order. References only; nothing copied.
fn training_sample(
    vectors: &[(VectorId, SharedVector)],
    sample_size: usize,
    seed: u64,
) -> Vec<&[f32]> {
    if sample_size >= vectors.len() {
        return vectors.iter().map(|(_, v)| v.as_ref()).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, vectors.len(), sample_size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| vectors[i].1.as_ref()).collect()
}

fn assign_shard(
    chunk: &[(VectorId, SharedVector)],
    centroids: &[Vec<f32>],
    metric: DistanceMetric,
) -> Vec<Vec<VectorId>> {
    let mut lists = vec![Vec::new(); centroids.len()];
    for (id, vector) in chunk {
        let (partition, _) = nearest_centroid(vector, centroids, metric);
        lists[partition.index()].push(*id);
    }
    lists
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Callback run at the start of every shard attempt, inside the worker.
#[cfg(test)]
pub(crate) struct ShardHook(Box<dyn Fn(usize) + Send + Sync>);

#[cfg(test)]
impl std::fmt::Debug for ShardHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ShardHook")
    }
}

#[cfg(test)]
impl IndexBuilder<'_> {
    pub(crate) fn with_shard_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.shard_hook = Some(ShardHook(Box::new(hook)));
        self
    }

    /// Makes one shard's worker panic `failures` times.
    fn with_fault(self, target: usize, failures: u32) -> Self {
        use std::sync::atomic::{AtomicU32, Ordering};
        let remaining = AtomicU32::new(failures);
        self.with_shard_hook(move |shard| {
            if shard == target
                && remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                panic!("injected fault in shard {shard}");
            }
        })
    }
}
