//! End-to-end catalog workflow: enable, add a column, create the index,
//! configure and apply resource settings.

use std::sync::Arc;

use ivfdex::{
    Catalog, CatalogError, CreateIndexOutcome, DistanceMetric, ResourceConfig, VectorError,
};

use crate::common::{ClusteredData, id};

fn populated_catalog() -> Catalog {
    let catalog = Catalog::default();
    catalog.enable_vector_capability();
    catalog.create_table("documents");
    catalog
        .add_vector_column("documents", "embedding", 32)
        .unwrap();

    let mut data = ClusteredData::new(5, 10, 32, 0.2);
    for n in 1..=1_000 {
        catalog
            .insert("documents", "embedding", id(n), &data.next_vector())
            .unwrap();
    }
    catalog
}

#[test]
fn test_create_index_is_idempotent() {
    let catalog = populated_catalog();
    assert!(!catalog.enable_vector_capability());

    let created = catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(10))
        .unwrap();
    let CreateIndexOutcome::Created(stats) = created else {
        panic!("first create_index must build");
    };
    assert_eq!(stats.vectors, 1_000);

    let engine = catalog.engine("documents", "embedding").unwrap();
    let table = engine.table().unwrap();

    for _ in 0..3 {
        let again = catalog
            .create_index("documents", "embedding", DistanceMetric::Cosine, Some(10))
            .unwrap();
        assert_eq!(again, CreateIndexOutcome::AlreadyExists);
    }
    assert_eq!(engine.build_count(), 1);
    assert!(Arc::ptr_eq(&table, &engine.table().unwrap()));
}

#[test]
fn test_conflicting_parameters_need_drop_first() {
    let catalog = populated_catalog();
    catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(10))
        .unwrap();

    let conflict = catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(20))
        .unwrap_err();
    assert_eq!(conflict.status_code(), "INDEX_CONFLICT");

    catalog.drop_index("documents", "embedding").unwrap();
    let rebuilt = catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(20))
        .unwrap();
    assert!(matches!(rebuilt, CreateIndexOutcome::Created(s) if s.lists == 20));
}

#[test]
fn test_configuration_applies_to_later_builds_only() {
    let catalog = populated_catalog();
    catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(10))
        .unwrap();
    let engine = catalog.engine("documents", "embedding").unwrap();
    let first = engine.table().unwrap();
    assert_eq!(first.build_info().config_version, 1);

    catalog
        .configure(ResourceConfig {
            maintenance_memory_mb: 128,
            max_parallel_build_workers: 4,
            max_parallel_query_workers_per_probe: 4,
            max_parallel_maintenance_workers: 4,
        })
        .unwrap();
    // Staged only
    catalog.reindex("documents", "embedding").unwrap();
    assert_eq!(engine.table().unwrap().build_info().config_version, 1);

    let applied = catalog.apply_configuration();
    assert_eq!(applied.version, 2);
    catalog.reindex("documents", "embedding").unwrap();
    assert_eq!(engine.table().unwrap().build_info().config_version, 2);

    // A reader holding the first table still sees it whole
    assert_eq!(first.build_info().config_version, 1);
    assert_eq!(first.vector_count(), 1_000);
}

#[test]
fn test_tight_memory_fails_build_without_committing() {
    let catalog = populated_catalog();
    catalog
        .configure(ResourceConfig {
            maintenance_memory_mb: 0,
            ..ResourceConfig::default()
        })
        .unwrap();
    catalog.apply_configuration();

    let err = catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(10))
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Vector(VectorError::ResourceExhausted { .. })
    ));
    assert_eq!(err.status_code(), "RESOURCE_EXHAUSTED");
    assert!(catalog.index_definition("documents", "embedding").unwrap().is_none());
    assert!(!catalog.engine("documents", "embedding").unwrap().is_built());
}

#[test]
fn test_search_and_inserts_after_build() {
    let catalog = populated_catalog();
    catalog
        .create_index("documents", "embedding", DistanceMetric::Cosine, Some(10))
        .unwrap();

    let mut target = vec![0.0; 32];
    target[3] = 1.0;
    let partition = catalog
        .insert("documents", "embedding", id(5_000), &target)
        .unwrap();
    assert!(partition.is_some());

    // The nearest partition alone is enough to find it
    let results = catalog
        .search("documents", "embedding", &target, 3, Some(1))
        .unwrap();
    assert_eq!(results[0].id, id(5_000));
    assert!(results[0].distance.abs() < 1e-5);

    let engine = catalog.engine("documents", "embedding").unwrap();
    assert_eq!(engine.stats().unwrap().vectors, 1_001);

    let err = catalog
        .search("documents", "embedding", &[1.0; 16], 3, None)
        .unwrap_err();
    assert_eq!(err.status_code(), "DIMENSION_MISMATCH");
}
