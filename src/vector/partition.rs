//! Partition table: trained centroids plus the inverted list of each partition.
//!
//! Centroids live in an arena indexed by [`PartitionId`]; the inverted lists
//! are keyed by the same dense id, so going from a centroid to its members is
//! a plain index. After commit the table is only ever mutated by appending
//! one id to one list, which swaps that list's pointer (copy-on-write), so
//! readers never take a lock. Every id is listed at most once; a placement
//! map from id to partition enforces that and answers membership lookups.
//!
//! # Persistence
//!
//! A saved index is a directory with:
//! - `partitions.bin`: centroids and inverted lists, bincode-encoded
//! - `metadata.json`: human-readable summary and format version

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vector::clustering::nearest_centroid;
use crate::vector::types::{
    DistanceMetric, PartitionId, VectorDimension, VectorError, VectorId,
};

/// Current on-disk format version for `partitions.bin` and `metadata.json`.
const FORMAT_VERSION: u32 = 1;

const PARTITIONS_FILE: &str = "partitions.bin";
const METADATA_FILE: &str = "metadata.json";

/// How a committed table was produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BuildInfo {
    pub seed: u64,
    /// Resource configuration version the build ran under.
    pub config_version: u64,
    pub sample_size: usize,
    pub iterations: usize,
    pub converged: bool,
    pub reseeded: usize,
    pub built_at: u64,
}

/// Partition table of one index.
#[derive(Debug)]
pub struct PartitionTable {
    metric: DistanceMetric,
    dimension: VectorDimension,
    centroids: Vec<Vec<f32>>,
    lists: Vec<ArcSwap<Vec<VectorId>>>,
    placement: DashMap<VectorId, PartitionId>,
    build_info: BuildInfo,
}

/// Summary statistics over the inverted lists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndexStats {
    pub lists: usize,
    pub vectors: usize,
    pub empty_partitions: usize,
    pub min_list_len: usize,
    pub max_list_len: usize,
    pub mean_list_len: f64,
}

/// Serialized form of a [`PartitionTable`].
#[derive(bincode::Encode, bincode::Decode)]
struct PartitionTableRecord {
    format_version: u32,
    metric: DistanceMetric,
    dimension: u32,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<VectorId>>,
    build_info: BuildInfo,
}

/// Human-readable index metadata written next to the binary table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub metric: DistanceMetric,
    pub lists: usize,
    pub dimension: usize,
    pub vector_count: usize,
    pub build_info: BuildInfo,
    pub saved_at: u64,
}

impl PartitionTable {
    /// Assembles a table, checking the structural invariants: one centroid
    /// and one list per partition, every centroid of the table's dimension,
    /// no id listed twice.
    pub fn new(
        metric: DistanceMetric,
        dimension: VectorDimension,
        centroids: Vec<Vec<f32>>,
        lists: Vec<Vec<VectorId>>,
        build_info: BuildInfo,
    ) -> Result<Self, VectorError> {
        if centroids.is_empty() {
            return Err(VectorError::InvalidParameter(
                "a partition table needs at least one centroid".to_string(),
            ));
        }
        if centroids.len() != lists.len() {
            return Err(VectorError::InvalidFormat(format!(
                "{} centroids but {} inverted lists",
                centroids.len(),
                lists.len()
            )));
        }
        for centroid in &centroids {
            dimension.validate_vector(centroid)?;
        }

        let placement = DashMap::with_capacity(lists.iter().map(Vec::len).sum());
        for (index, list) in lists.iter().enumerate() {
            for &id in list {
                if placement.insert(id, PartitionId::from(index)).is_some() {
                    return Err(VectorError::InvalidFormat(format!(
                        "vector {id} appears in more than one inverted list entry"
                    )));
                }
            }
        }

        Ok(Self {
            metric,
            dimension,
            centroids,
            lists: lists.into_iter().map(ArcSwap::from_pointee).collect(),
            placement,
            build_info,
        })
    }

    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of partitions.
    #[must_use]
    pub fn lists(&self) -> usize {
        self.centroids.len()
    }

    #[must_use]
    pub fn build_info(&self) -> &BuildInfo {
        &self.build_info
    }

    #[must_use]
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Members of a partition in insertion order.
    ///
    /// # Panics
    /// Panics if `partition` is out of range.
    #[must_use]
    pub fn members(&self, partition: PartitionId) -> Arc<Vec<VectorId>> {
        self.lists[partition.index()].load_full()
    }

    /// Copy of every inverted list, indexed by partition.
    #[must_use]
    pub fn membership(&self) -> Vec<Vec<VectorId>> {
        self.lists.iter().map(|list| list.load().to_vec()).collect()
    }

    /// Number of distinct ids referenced by the inverted lists.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.placement.len()
    }

    /// Partition whose list holds `id`, if any.
    #[must_use]
    pub fn partition_of(&self, id: VectorId) -> Option<PartitionId> {
        self.placement.get(&id).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn contains(&self, id: VectorId) -> bool {
        self.placement.contains_key(&id)
    }

    /// Nearest centroid to `vector` (ties to the lowest id).
    pub fn nearest_partition(&self, vector: &[f32]) -> Result<PartitionId, VectorError> {
        self.dimension.validate_vector(vector)?;
        Ok(nearest_centroid(vector, &self.centroids, self.metric).0)
    }

    /// Ranks all partitions by centroid distance to `query`, ascending, ties
    /// broken by lowest partition id, and keeps the first `probes`.
    #[must_use]
    pub fn rank_partitions(&self, query: &[f32], probes: usize) -> Vec<(PartitionId, f32)> {
        let mut ranked: Vec<(PartitionId, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, centroid)| (PartitionId::from(i), self.metric.distance(query, centroid)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.truncate(probes);
        ranked
    }

    /// Appends `id` to the list of the nearest existing centroid.
    ///
    /// Centroids and other members are left untouched; partition quality
    /// drifts with many appends until the next full rebuild. An id that is
    /// already listed keeps its partition and is not appended again, even
    /// when concurrent callers race on the same id.
    pub fn append(&self, id: VectorId, vector: &[f32]) -> Result<PartitionId, VectorError> {
        let partition = self.nearest_partition(vector)?;
        match self.placement.entry(id) {
            Entry::Occupied(existing) => Ok(*existing.get()),
            Entry::Vacant(slot) => {
                self.lists[partition.index()].rcu(|current| {
                    let mut next = Vec::with_capacity(current.len() + 1);
                    next.extend_from_slice(current);
                    next.push(id);
                    next
                });
                slot.insert(partition);
                Ok(partition)
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let lengths: Vec<usize> = self.lists.iter().map(|list| list.load().len()).collect();
        let vectors: usize = lengths.iter().sum();

        IndexStats {
            lists: lengths.len(),
            vectors,
            empty_partitions: lengths.iter().filter(|&&len| len == 0).count(),
            min_list_len: lengths.iter().copied().min().unwrap_or(0),
            max_list_len: lengths.iter().copied().max().unwrap_or(0),
            mean_list_len: vectors as f64 / lengths.len().max(1) as f64,
        }
    }

    /// Writes `partitions.bin` and `metadata.json` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), VectorError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let record = PartitionTableRecord {
            format_version: FORMAT_VERSION,
            metric: self.metric,
            dimension: self.dimension.get() as u32,
            centroids: self.centroids.clone(),
            lists: self.membership(),
            build_info: self.build_info,
        };
        let bytes = bincode::encode_to_vec(&record, bincode::config::standard())
            .map_err(|e| VectorError::Serialization(format!("Failed to encode partitions: {e}")))?;

        write_replacing(&dir.join(PARTITIONS_FILE), &bytes)?;

        let metadata = IndexMetadata {
            format_version: FORMAT_VERSION,
            metric: self.metric,
            lists: self.lists(),
            dimension: self.dimension.get(),
            vector_count: record.lists.iter().map(Vec::len).sum(),
            build_info: self.build_info,
            saved_at: unix_timestamp(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| VectorError::Serialization(format!("Failed to encode metadata: {e}")))?;
        write_replacing(&dir.join(METADATA_FILE), json.as_bytes())?;

        debug!(
            "Saved partition table ({} lists, {} vectors) to {}",
            metadata.lists,
            metadata.vector_count,
            dir.display()
        );
        Ok(())
    }

    /// Loads a table written by [`Self::save`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, VectorError> {
        let dir = dir.as_ref();
        let bytes = std::fs::read(dir.join(PARTITIONS_FILE))?;
        let (record, _): (PartitionTableRecord, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| {
                VectorError::Serialization(format!("Failed to decode partitions: {e}"))
            })?;

        if record.format_version != FORMAT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: record.format_version,
            });
        }

        let dimension = VectorDimension::new(record.dimension as usize)?;
        let table = Self::new(
            record.metric,
            dimension,
            record.centroids,
            record.lists,
            record.build_info,
        )?;
        debug!(
            "Loaded partition table ({} lists, {} vectors) from {}",
            table.lists(),
            table.vector_count(),
            dir.display()
        );
        Ok(table)
    }

    /// Reads only `metadata.json`.
    pub fn load_metadata(dir: impl AsRef<Path>) -> Result<IndexMetadata, VectorError> {
        let json = std::fs::read_to_string(dir.as_ref().join(METADATA_FILE))?;
        let metadata: IndexMetadata = serde_json::from_str(&json)
            .map_err(|e| VectorError::Serialization(format!("Failed to parse metadata: {e}")))?;
        if metadata.format_version > FORMAT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: metadata.format_version,
            });
        }
        Ok(metadata)
    }

    /// Whether `dir` holds a saved table.
    #[must_use]
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(PARTITIONS_FILE).exists()
    }
}

/// Writes `path` through a sibling `.tmp` file and a rename.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<(), VectorError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
