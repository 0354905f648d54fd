//! Shared fixtures for integration tests.
#![allow(dead_code)]

use ivfdex::{ResourceBudget, ResourceConfig, ResourceSnapshot, VectorDimension, VectorId, VectorStore};
use ivfdex::vector::normalize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn id(n: u32) -> VectorId {
    VectorId::new(n).expect("test ids are non-zero")
}

pub fn budget() -> ResourceBudget {
    budget_with(ResourceConfig::default())
}

pub fn budget_with(config: ResourceConfig) -> ResourceBudget {
    ResourceBudget::from_snapshot(&ResourceSnapshot { version: 1, config })
}

pub fn random_unit_vector(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
    normalize(&mut v);
    v
}

/// Unit vectors scattered around `clusters` random unit centers.
///
/// Each component of a point is its center's component plus uniform noise in
/// `[-noise, noise]`, then the point is renormalized.
pub struct ClusteredData {
    rng: StdRng,
    centers: Vec<Vec<f32>>,
    noise: f32,
}

impl ClusteredData {
    pub fn new(seed: u64, clusters: usize, dimension: usize, noise: f32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let centers = (0..clusters)
            .map(|_| random_unit_vector(&mut rng, dimension))
            .collect();
        Self {
            rng,
            centers,
            noise,
        }
    }

    pub fn next_vector(&mut self) -> Vec<f32> {
        let center = self.rng.random_range(0..self.centers.len());
        let mut v: Vec<f32> = self.centers[center]
            .iter()
            .map(|c| c + self.rng.random_range(-self.noise..self.noise))
            .collect();
        normalize(&mut v);
        v
    }

    /// Fills a new store with ids `1..=count`.
    pub fn store(&mut self, count: u32) -> VectorStore {
        let dimension = self.centers[0].len();
        let store = VectorStore::new(VectorDimension::new(dimension).expect("non-zero dimension"));
        for n in 1..=count {
            let v = self.next_vector();
            store.insert(id(n), &v).expect("fixture vectors match the store");
        }
        store
    }
}

/// A store of uniformly random (not normalized) vectors.
pub fn random_store(seed: u64, count: u32, dimension: usize) -> VectorStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = VectorStore::new(VectorDimension::new(dimension).expect("non-zero dimension"));
    for n in 1..=count {
        let v: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
        store.insert(id(n), &v).expect("fixture vectors match the store");
    }
    store
}
