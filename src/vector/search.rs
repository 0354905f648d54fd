//! Query execution against a committed partition table.
//!
//! A query ranks every centroid, scans the members of the `probes` nearest
//! partitions with exact distances, and keeps the best `k` in a bounded
//! max-heap. `probes` is the recall/latency knob: `probes = 1` is the fastest
//! and least accurate, `probes = lists` scans everything and is exact.
//!
//! Selected partitions may be scanned concurrently (bounded by the resource
//! budget); each worker keeps its own heap and the heaps are merged at the end.
//! Results are ordered by distance, then by id, so repeated queries against
//! an unchanged index return identical results.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::vector::budget::ResourceBudget;
use crate::vector::partition::PartitionTable;
use crate::vector::store::VectorStore;
use crate::vector::types::{DistanceMetric, Neighbor, PartitionId, VectorError, VectorId};

/// Members scanned between deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Per-query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub k: usize,
    /// Partitions to scan; values above `lists` are clamped.
    pub probes: usize,
    pub timeout: Option<Duration>,
}

impl SearchParams {
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            probes: 1,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_probes(mut self, probes: usize) -> Self {
        self.probes = probes;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    distance: f32,
    id: VectorId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Worst entry (largest distance, then largest id) sits at the top
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Bounded max-heap keeping the `k` best candidates seen so far.
#[derive(Debug)]
struct TopK {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<VectorId>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
            seen: HashSet::new(),
        }
    }

    /// Offers a candidate. An id already offered is ignored.
    fn push(&mut self, id: VectorId, distance: f32) {
        if !self.seen.insert(id) {
            return;
        }
        let entry = HeapEntry { distance, id };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek()
            && entry < *worst
        {
            self.heap.pop();
            self.heap.push(entry);
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for entry in other.heap {
            self.push(entry.id, entry.distance);
        }
        self
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| Neighbor {
                id: entry.id,
                distance: entry.distance,
            })
            .collect()
    }
}

/// Runs queries against one partition table snapshot.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor<'a> {
    table: &'a PartitionTable,
    store: &'a VectorStore,
    budget: ResourceBudget,
}

impl<'a> QueryExecutor<'a> {
    #[must_use]
    pub fn new(table: &'a PartitionTable, store: &'a VectorStore, budget: ResourceBudget) -> Self {
        Self {
            table,
            store,
            budget,
        }
    }

    /// Approximate k-nearest-neighbor search.
    ///
    /// Returns at most `k` neighbors ascending by distance. Fails with
    /// `DimensionMismatch` for a query of the wrong length, `EmptyIndex` when
    /// no vector is indexed or every vector has since been deleted, and
    /// `Timeout` when the deadline passes; a timed out query never returns
    /// partial results.
    pub fn search(&self, query: &[f32], params: SearchParams) -> Result<Vec<Neighbor>, VectorError> {
        let started = Instant::now();
        self.table.dimension().validate_vector(query)?;
        if params.k == 0 {
            return Err(VectorError::InvalidParameter("k must be at least 1".to_string()));
        }
        if params.probes == 0 {
            return Err(VectorError::InvalidParameter(
                "probes must be at least 1".to_string(),
            ));
        }
        if self.table.vector_count() == 0 || self.store.is_empty() {
            return Err(VectorError::EmptyIndex);
        }

        let probes = params.probes.min(self.table.lists());
        let selected: Vec<PartitionId> = self
            .table
            .rank_partitions(query, probes)
            .into_iter()
            .map(|(partition, _)| partition)
            .collect();

        let deadline = params.timeout.map(|limit| (started, limit));
        let parallelism = self.budget.scan_parallelism(selected.len());

        let top = if parallelism <= 1 {
            self.scan(query, &selected, params.k, deadline)?
        } else {
            let chunk_size = selected.len().div_ceil(parallelism);
            selected
                .par_chunks(chunk_size)
                .map(|chunk| self.scan(query, chunk, params.k, deadline))
                .collect::<Result<Vec<TopK>, VectorError>>()?
                .into_iter()
                .fold(TopK::new(params.k), TopK::merge)
        };

        let results = top.into_sorted();
        debug!(
            "Search scanned {} of {} partitions with {} workers, returned {} results in {:?}",
            selected.len(),
            self.table.lists(),
            parallelism,
            results.len(),
            started.elapsed()
        );
        Ok(results)
    }

    /// Scans the given partitions into one bounded heap.
    fn scan(
        &self,
        query: &[f32],
        partitions: &[PartitionId],
        k: usize,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<TopK, VectorError> {
        let metric = self.table.metric();
        let mut top = TopK::new(k);
        let mut scanned = 0usize;

        for &partition in partitions {
            check_deadline(deadline)?;
            for &id in self.table.members(partition).iter() {
                scanned += 1;
                if scanned % DEADLINE_CHECK_INTERVAL == 0 {
                    check_deadline(deadline)?;
                }
                // Deleted since the last rebuild
                let Some(vector) = self.store.try_get(id) else {
                    continue;
                };
                top.push(id, metric.distance(query, &vector));
            }
        }
        check_deadline(deadline)?;
        Ok(top)
    }
}

fn check_deadline(deadline: Option<(Instant, Duration)>) -> Result<(), VectorError> {
    if let Some((started, limit)) = deadline {
        let elapsed = started.elapsed();
        if elapsed > limit {
            warn!("Search exceeded its time limit: {elapsed:?} > {limit:?}");
            return Err(VectorError::Timeout { elapsed, limit });
        }
    }
    Ok(())
}

/// Exact k-nearest-neighbor scan over the whole store.
///
/// Used as the ground truth when measuring recall; ordering and tie-breaking
/// match [`QueryExecutor::search`].
pub fn search_exact(
    store: &VectorStore,
    metric: DistanceMetric,
    query: &[f32],
    k: usize,
) -> Result<Vec<Neighbor>, VectorError> {
    store.dimension().validate_vector(query)?;
    if k == 0 {
        return Err(VectorError::InvalidParameter("k must be at least 1".to_string()));
    }
    if store.is_empty() {
        return Err(VectorError::EmptyStore);
    }

    let mut top = TopK::new(k);
    for (id, vector) in store.snapshot() {
        top.push(id, metric.distance(query, &vector));
    }
    Ok(top.into_sorted())
}

/// Fraction of `truth` ids present in `found`.
#[must_use]
pub fn recall(found: &[Neighbor], truth: &[Neighbor]) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }
    let found: HashSet<VectorId> = found.iter().map(|n| n.id).collect();
    let hits = truth.iter().filter(|n| found.contains(&n.id)).count();
    hits as f64 / truth.len() as f64
}
