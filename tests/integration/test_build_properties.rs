//! Build-level properties: completeness, determinism, dimensionality and
//! resource limits.

use std::collections::HashSet;
use std::sync::Arc;

use ivfdex::vector::IndexBuilder;
use ivfdex::{
    BuildParams, DistanceMetric, ResourceConfig, VectorDimension, VectorError, VectorId,
    VectorIndexEngine, VectorStore,
};

use crate::common::{ClusteredData, budget, budget_with, id, random_store};

fn params(lists: usize, seed: u64) -> BuildParams {
    BuildParams {
        metric: DistanceMetric::Euclidean,
        lists: Some(lists),
        seed,
        ..BuildParams::default()
    }
}

#[test]
fn test_every_stored_vector_in_exactly_one_list() {
    let store = random_store(5, 4_000, 24);
    let table = IndexBuilder::new(&store, budget())
        .build(&params(50, 42))
        .unwrap();

    let mut seen: HashSet<VectorId> = HashSet::new();
    for list in table.membership() {
        for member in list {
            assert!(seen.insert(member), "{member} appears twice");
        }
    }
    let stored: HashSet<VectorId> = store.snapshot().into_iter().map(|(id, _)| id).collect();
    assert_eq!(seen, stored);
    assert_eq!(table.lists(), 50);
    assert_eq!(table.centroids().len(), 50);
}

#[test]
fn test_same_seed_builds_identical_tables() {
    let mut data = ClusteredData::new(21, 12, 16, 0.2);
    let store = data.store(3_000);

    let a = IndexBuilder::new(&store, budget()).build(&params(12, 7)).unwrap();
    let b = IndexBuilder::new(
        &store,
        budget_with(ResourceConfig {
            max_parallel_build_workers: 4,
            max_parallel_maintenance_workers: 4,
            ..ResourceConfig::default()
        }),
    )
    .build(&params(12, 7))
    .unwrap();

    assert_eq!(a.centroids(), b.centroids());
    assert_eq!(a.membership(), b.membership());
}

#[test]
fn test_store_contents_not_insertion_order_drive_the_build() {
    let forward = VectorStore::new(VectorDimension::new(4).unwrap());
    let backward = VectorStore::new(VectorDimension::new(4).unwrap());
    let vectors: Vec<(VectorId, Vec<f32>)> = (1..=500)
        .map(|n| (id(n), vec![n as f32, (n % 7) as f32, (n % 13) as f32, 1.0]))
        .collect();
    for (vid, v) in &vectors {
        forward.insert(*vid, v).unwrap();
    }
    for (vid, v) in vectors.iter().rev() {
        backward.insert(*vid, v).unwrap();
    }

    let a = IndexBuilder::new(&forward, budget()).build(&params(8, 1)).unwrap();
    let b = IndexBuilder::new(&backward, budget()).build(&params(8, 1)).unwrap();
    assert_eq!(a.centroids(), b.centroids());
    assert_eq!(a.membership(), b.membership());
}

#[test]
fn test_no_empty_partitions_on_clustered_data() {
    let mut data = ClusteredData::new(3, 20, 16, 0.15);
    let store = data.store(2_000);
    let table = IndexBuilder::new(&store, budget()).build(&params(20, 42)).unwrap();
    assert_eq!(table.stats().empty_partitions, 0);
}

#[test]
fn test_wrong_dimension_rejected_and_store_unchanged() {
    let store = VectorStore::new(VectorDimension::new(128).unwrap());
    store.insert(id(1), &vec![0.1; 128]).unwrap();

    let result = store.insert(id(2), &vec![0.1; 64]);
    assert!(matches!(
        result,
        Err(VectorError::DimensionMismatch {
            expected: 128,
            actual: 64
        })
    ));
    assert_eq!(store.len(), 1);
    assert_eq!(store.dimension().get(), 128);
}

#[test]
fn test_empty_store_fails_build() {
    let engine = VectorIndexEngine::new(Arc::new(VectorStore::new(VectorDimension::new(8).unwrap())));
    let result = engine.build(&params(4, 42), budget(), None);
    assert!(matches!(result, Err(VectorError::EmptyStore)));
    assert!(!engine.is_built());
}

#[test]
fn test_memory_ceiling_fails_fast() {
    let store = random_store(1, 500, 256);
    let tight = budget_with(ResourceConfig {
        maintenance_memory_mb: 0,
        ..ResourceConfig::default()
    });
    let result = IndexBuilder::new(&store, tight).build(&params(10, 42));
    match result {
        Err(VectorError::ResourceExhausted {
            needed_bytes,
            limit_bytes,
            ..
        }) => {
            assert_eq!(limit_bytes, 0);
            assert!(needed_bytes > 0);
        }
        other => panic!("expected ResourceExhausted, got {other:?}"),
    }
}

#[test]
fn test_sample_capped_by_memory_budget() {
    // 1 MB fits roughly 1,000 samples of 256 floats next to the centroids
    let store = random_store(2, 3_000, 256);
    let one_mb = budget_with(ResourceConfig {
        maintenance_memory_mb: 1,
        ..ResourceConfig::default()
    });
    let wants_everything = BuildParams {
        samples_per_list: 1_000,
        ..params(10, 42)
    };
    let table = IndexBuilder::new(&store, one_mb).build(&wants_everything).unwrap();

    let info = table.build_info();
    assert!(info.sample_size < 3_000, "sample was {}", info.sample_size);
    assert!(info.sample_size >= 10);
    assert_eq!(table.vector_count(), 3_000);
}
