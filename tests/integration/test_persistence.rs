//! Saving and reloading an engine preserves the store and the partition table.

use std::sync::Arc;

use ivfdex::vector::{IndexMetadata, PartitionTable};
use ivfdex::{BuildParams, DistanceMetric, SearchParams, VectorError, VectorIndexEngine};
use tempfile::TempDir;

use crate::common::{ClusteredData, budget, id};

fn built_engine() -> VectorIndexEngine {
    let mut data = ClusteredData::new(17, 8, 24, 0.2);
    let engine = VectorIndexEngine::new(Arc::new(data.store(1_500)));
    let params = BuildParams {
        metric: DistanceMetric::Cosine,
        lists: Some(16),
        ..BuildParams::default()
    };
    engine.build(&params, budget(), None).unwrap();
    engine
}

#[test]
fn test_reload_preserves_index_and_results() {
    let temp = TempDir::new().unwrap();
    let engine = built_engine();
    engine.save(temp.path()).unwrap();

    let loaded = VectorIndexEngine::load(temp.path()).unwrap();
    let (before, after) = (engine.table().unwrap(), loaded.table().unwrap());
    assert_eq!(after.metric(), DistanceMetric::Cosine);
    assert_eq!(after.centroids(), before.centroids());
    assert_eq!(after.membership(), before.membership());
    assert_eq!(after.build_info(), before.build_info());
    assert_eq!(loaded.store().snapshot(), engine.store().snapshot());

    let query = engine.store().get(id(42)).unwrap();
    let params = SearchParams::new(10).with_probes(4);
    assert_eq!(
        loaded.search(&query, params, budget()).unwrap(),
        engine.search(&query, params, budget()).unwrap()
    );
}

#[test]
fn test_metadata_is_readable_json() {
    let temp = TempDir::new().unwrap();
    let engine = built_engine();
    engine.save(temp.path()).unwrap();

    let index_dir = temp.path().join("index");
    let metadata: IndexMetadata = PartitionTable::load_metadata(&index_dir).unwrap();
    assert_eq!(metadata.lists, 16);
    assert_eq!(metadata.dimension, 24);
    assert_eq!(metadata.vector_count, 1_500);
    assert_eq!(metadata.metric, DistanceMetric::Cosine);

    let raw = std::fs::read_to_string(index_dir.join("metadata.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["metric"], "cosine");
}

#[test]
fn test_incremental_inserts_survive_reload() {
    let temp = TempDir::new().unwrap();
    let engine = built_engine();
    engine.insert(id(9_999), &vec![0.5; 24]).unwrap();
    engine.save(temp.path()).unwrap();

    let loaded = VectorIndexEngine::load(temp.path()).unwrap();
    assert_eq!(loaded.stats().unwrap().vectors, 1_501);
    assert!(loaded.table().unwrap().partition_of(id(9_999)).is_some());
}

#[test]
fn test_corrupted_table_is_rejected() {
    let temp = TempDir::new().unwrap();
    built_engine().save(temp.path()).unwrap();
    std::fs::write(temp.path().join("index").join("partitions.bin"), b"garbage").unwrap();

    let result = VectorIndexEngine::load(temp.path());
    assert!(matches!(
        result,
        Err(VectorError::Serialization(_)
            | VectorError::InvalidFormat(_)
            | VectorError::VersionMismatch { .. })
    ));
}

#[test]
fn test_missing_data_dir() {
    let temp = TempDir::new().unwrap();
    assert!(!VectorIndexEngine::exists(temp.path()));
    assert!(matches!(
        VectorIndexEngine::load(temp.path()),
        Err(VectorError::Storage(_))
    ));
}
