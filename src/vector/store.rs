//! Vector store: the raw vectors every index is built from.
//!
//! The store is shared between writers (insert/delete) and readers (builds,
//! queries) without a global lock: entries live in a sharded concurrent map
//! and each vector is an immutable `Arc<[f32]>`, so a reader holding a vector
//! is never affected by a later overwrite. Writes to one id are
//! last-writer-wins.
//!
//! # Snapshot format
//!
//! `save`/`open` use a simple little-endian binary layout:
//! - Header (16 bytes): magic `IVEC`, version, dimension, vector count
//! - Records: `u32` vector id followed by `dimension` f32 values
//!
//! Snapshots are read back through a memory map.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use memmap2::MmapOptions;
use tracing::debug;

use crate::vector::types::{VectorDimension, VectorError, VectorId};

/// Current snapshot format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the snapshot header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify vector snapshot files.
const MAGIC_BYTES: &[u8; 4] = b"IVEC";

const BYTES_PER_F32: usize = 4;
const BYTES_PER_ID: usize = 4;

/// Shared handle to a vector.
pub type SharedVector = Arc<[f32]>;

/// Concurrent in-memory vector store with a fixed dimensionality.
#[derive(Debug)]
pub struct VectorStore {
    vectors: DashMap<VectorId, SharedVector>,
    dimension: VectorDimension,
}

impl VectorStore {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            vectors: DashMap::new(),
            dimension,
        }
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Inserts or overwrites the vector stored under `id`.
    ///
    /// Fails with `DimensionMismatch` when the length differs from the store
    /// dimension; the store is left unchanged in that case.
    pub fn insert(&self, id: VectorId, vector: &[f32]) -> Result<(), VectorError> {
        self.dimension.validate_vector(vector)?;
        if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::InvalidParameter(format!(
                "vector {id} has a non-finite component at position {position}"
            )));
        }
        self.vectors.insert(id, Arc::from(vector));
        Ok(())
    }

    /// Direct lookup. A missing id is an error here; scans use [`Self::try_get`].
    pub fn get(&self, id: VectorId) -> Result<SharedVector, VectorError> {
        self.try_get(id).ok_or(VectorError::NotFound(id))
    }

    /// Lookup used by scans, where a miss (deleted id) is simply skipped.
    #[must_use]
    pub fn try_get(&self, id: VectorId) -> Option<SharedVector> {
        self.vectors.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes a vector. Inverted lists may keep referring to `id` until the
    /// next rebuild; scans skip it.
    pub fn delete(&self, id: VectorId) -> bool {
        self.vectors.remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: VectorId) -> bool {
        self.vectors.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Point-in-time copy of the store contents, ordered by id.
    ///
    /// Ordering by id makes every downstream step (sampling, sharding,
    /// inverted-list order) independent of insertion timing.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(VectorId, SharedVector)> {
        let mut entries: Vec<(VectorId, SharedVector)> = self
            .vectors
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Writes the store to `path`, replacing any previous snapshot atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VectorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = self.snapshot();
        let tmp_path = path.with_extension("vec.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(MAGIC_BYTES)?;
            writer.write_all(&STORAGE_VERSION.to_le_bytes())?;
            writer.write_all(&(self.dimension.get() as u32).to_le_bytes())?;
            writer.write_all(&(entries.len() as u32).to_le_bytes())?;

            for (id, vector) in &entries {
                writer.write_all(&id.to_bytes())?;
                for &value in vector.iter() {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, path)?;

        debug!(
            "Saved {} vectors (dimension {}) to {}",
            entries.len(),
            self.dimension.get(),
            path.display()
        );
        Ok(())
    }

    /// Loads a snapshot written by [`Self::save`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the snapshot is written to a temp file and renamed into
        // place, so the mapped file is never modified while mapped.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let (version, dimension, vector_count) = read_header(&mmap)?;
        if version != STORAGE_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            });
        }

        let record_size = BYTES_PER_ID + dimension.get() * BYTES_PER_F32;
        let body = &mmap[HEADER_SIZE..];
        if body.len() != record_size * vector_count {
            return Err(VectorError::InvalidFormat(format!(
                "expected {vector_count} records of {record_size} bytes, found {} bytes",
                body.len()
            )));
        }

        let store = Self::new(dimension);
        for record in body.chunks_exact(record_size) {
            let id = VectorId::from_bytes(read_u32_bytes(&record[..BYTES_PER_ID]))
                .ok_or_else(|| VectorError::InvalidFormat("zero vector id".to_string()))?;
            let vector: Vec<f32> = record[BYTES_PER_ID..]
                .chunks_exact(BYTES_PER_F32)
                .map(|bytes| f32::from_le_bytes(read_u32_bytes(bytes)))
                .collect();
            store.vectors.insert(id, Arc::from(vector));
        }

        debug!(
            "Loaded {} vectors (dimension {}) from {}",
            store.len(),
            dimension.get(),
            path.display()
        );
        Ok(store)
    }
}

fn read_u32_bytes(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn read_header(bytes: &[u8]) -> Result<(u32, VectorDimension, usize), VectorError> {
    if bytes.len() < HEADER_SIZE {
        return Err(VectorError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(VectorError::InvalidFormat(
            "Invalid magic bytes".to_string(),
        ));
    }

    let version = u32::from_le_bytes(read_u32_bytes(&bytes[4..8]));
    let dimension = VectorDimension::new(u32::from_le_bytes(read_u32_bytes(&bytes[8..12])) as usize)?;
    let vector_count = u32::from_le_bytes(read_u32_bytes(&bytes[12..16])) as usize;

    Ok((version, dimension, vector_count))
}
