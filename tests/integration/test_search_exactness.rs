//! Exhaustive probing must match a brute-force scan exactly, for every metric.

use std::sync::Arc;

use ivfdex::vector::search_exact;
use ivfdex::{BuildParams, DistanceMetric, SearchParams, VectorError, VectorIndexEngine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::{budget, budget_with, id, random_store};

fn engine_for(metric: DistanceMetric) -> VectorIndexEngine {
    let engine = VectorIndexEngine::new(Arc::new(random_store(3, 2_000, 16)));
    let params = BuildParams {
        metric,
        lists: Some(20),
        ..BuildParams::default()
    };
    engine.build(&params, budget(), None).unwrap();
    engine
}

#[test]
fn test_all_probes_equals_brute_force() {
    let mut rng = StdRng::seed_from_u64(99);
    for metric in [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::InnerProduct,
    ] {
        let engine = engine_for(metric);
        for _ in 0..10 {
            let query: Vec<f32> = (0..16).map(|_| rng.random_range(-1.0..1.0)).collect();
            let approx = engine
                .search(&query, SearchParams::new(10).with_probes(20), budget())
                .unwrap();
            let exact = search_exact(engine.store(), metric, &query, 10).unwrap();
            assert_eq!(approx, exact, "metric {metric}");
        }
    }
}

#[test]
fn test_parallel_scan_matches_serial_scan() {
    let engine = engine_for(DistanceMetric::Euclidean);
    let query = vec![0.25; 16];
    let params = SearchParams::new(15).with_probes(8);

    let serial = engine
        .search(
            &query,
            params,
            budget_with(ivfdex::ResourceConfig {
                max_parallel_query_workers_per_probe: 1,
                ..Default::default()
            }),
        )
        .unwrap();
    let parallel = engine
        .search(
            &query,
            params,
            budget_with(ivfdex::ResourceConfig {
                max_parallel_query_workers_per_probe: 8,
                ..Default::default()
            }),
        )
        .unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn test_repeated_queries_are_identical() {
    let engine = engine_for(DistanceMetric::Cosine);
    let query = vec![0.5; 16];
    let params = SearchParams::new(10).with_probes(3);
    let first = engine.search(&query, params, budget()).unwrap();
    for _ in 0..5 {
        assert_eq!(engine.search(&query, params, budget()).unwrap(), first);
    }
}

#[test]
fn test_fewer_candidates_than_k() {
    let engine = engine_for(DistanceMetric::Euclidean);
    let results = engine
        .search(&[0.0; 16], SearchParams::new(5_000).with_probes(20), budget())
        .unwrap();
    assert_eq!(results.len(), 2_000);
}

#[test]
fn test_index_with_every_vector_deleted_fails_explicitly() {
    let engine = engine_for(DistanceMetric::Euclidean);
    for n in 1..=2_000 {
        engine.delete(id(n));
    }
    assert!(matches!(
        engine.search(&[0.0; 16], SearchParams::new(5).with_probes(20), budget()),
        Err(VectorError::EmptyIndex)
    ));

    assert!(matches!(
        engine.search(&[0.0; 8], SearchParams::new(5), budget()),
        Err(VectorError::DimensionMismatch {
            expected: 16,
            actual: 8
        })
    ));

    // A vector written back makes the index usable again
    engine.insert(id(7), &[0.5; 16]).unwrap();
    let results = engine
        .search(&[0.5; 16], SearchParams::new(5).with_probes(20), budget())
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, id(7));
}
