//! Recall of the approximate search against brute force on a realistic
//! workload: 10,000 unit vectors in 128 dimensions, 100 lists.

use std::sync::Arc;

use ivfdex::vector::{recall, search_exact};
use ivfdex::{BuildParams, DistanceMetric, SearchParams, VectorIndexEngine};

use crate::common::{ClusteredData, budget};

const DIMENSION: usize = 128;
const VECTORS: u32 = 10_000;
const LISTS: usize = 100;
const QUERIES: usize = 100;
const K: usize = 5;

fn build_engine(data: &mut ClusteredData) -> VectorIndexEngine {
    let engine = VectorIndexEngine::new(Arc::new(data.store(VECTORS)));
    let params = BuildParams {
        metric: DistanceMetric::Cosine,
        lists: Some(LISTS),
        max_iterations: 8,
        ..BuildParams::default()
    };
    let stats = engine.build(&params, budget(), None).unwrap();
    assert_eq!(stats.lists, LISTS);
    assert_eq!(stats.vectors, VECTORS as usize);
    engine
}

#[test]
fn test_recall_at_5_with_10_probes() {
    let mut data = ClusteredData::new(7, 100, DIMENSION, 0.1);
    let engine = build_engine(&mut data);

    let mut total = 0.0;
    for _ in 0..QUERIES {
        let query = data.next_vector();
        let approx = engine
            .search(&query, SearchParams::new(K).with_probes(10), budget())
            .unwrap();
        let exact = search_exact(engine.store(), DistanceMetric::Cosine, &query, K).unwrap();

        assert_eq!(approx.len(), K);
        assert!(approx.windows(2).all(|w| w[0].distance <= w[1].distance));
        total += recall(&approx, &exact);
    }

    let mean = total / QUERIES as f64;
    assert!(mean >= 0.9, "recall@{K} with 10 probes was {mean:.3}");
}

#[test]
fn test_recall_never_decreases_with_more_probes() {
    let mut data = ClusteredData::new(11, 60, 32, 0.3);
    let engine = VectorIndexEngine::new(Arc::new(data.store(3_000)));
    let params = BuildParams {
        metric: DistanceMetric::Cosine,
        lists: Some(40),
        ..BuildParams::default()
    };
    engine.build(&params, budget(), None).unwrap();

    for _ in 0..20 {
        let query = data.next_vector();
        let exact = engine.search_exact(&query, 10).unwrap();

        let mut previous = 0.0;
        for probes in [1, 2, 5, 10, 20, 40] {
            let approx = engine
                .search(&query, SearchParams::new(10).with_probes(probes), budget())
                .unwrap();
            let current = recall(&approx, &exact);
            assert!(
                current >= previous,
                "recall dropped from {previous} to {current} at probes={probes}"
            );
            previous = current;
        }
        // All partitions scanned: exact
        assert_eq!(previous, 1.0);
    }
}
