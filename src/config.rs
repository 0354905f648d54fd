//! Configuration for the vector index.
//!
//! Settings are layered:
//! - Default values
//! - TOML configuration file (`.ivfdex/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `IVFDEX_` and use double
//! underscores to separate nested levels:
//! - `IVFDEX_RESOURCES__MAINTENANCE_MEMORY_MB=256` sets `resources.maintenance_memory_mb`
//! - `IVFDEX_INDEX__PROBES=10` sets `index.probes`
//!
//! # Resource configuration
//!
//! Memory and parallelism ceilings are not read from ambient state by builds
//! or queries. They are staged in a [`ConfigRegistry`] and become visible only
//! when applied; each build and query captures the applied
//! [`ResourceSnapshot`] once, at start.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::vector::DistanceMetric;

/// Directory holding the settings file, searched upward from the cwd.
const CONFIG_DIR: &str = ".ivfdex";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory for the vector snapshot and persisted index
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    /// Index construction and query defaults
    #[serde(default)]
    pub index: IndexConfig,

    /// Memory and parallelism ceilings
    #[serde(default)]
    pub resources: ResourceConfig,
}

/// Parameters of a single index and of its training run.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Distance metric, fixed for the lifetime of an index
    #[serde(default)]
    pub metric: DistanceMetric,

    /// Partition count; derived from store cardinality when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lists: Option<usize>,

    /// Partitions scanned per query
    #[serde(default = "default_probes")]
    pub probes: usize,

    /// Seed for sampling and centroid initialization
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// K-means iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Training stops once fewer than this fraction of sampled vectors change partition
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f32,

    /// Training sample size per partition before the memory cap applies
    #[serde(default = "default_samples_per_list")]
    pub samples_per_list: usize,

    /// Per-query time limit in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,
}

/// Memory and parallelism ceilings for builds and queries.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Memory ceiling for training samples and assignment buffers
    #[serde(default = "default_maintenance_memory_mb")]
    pub maintenance_memory_mb: u64,

    /// Workers for the parallel assignment pass of a build
    #[serde(default = "default_workers")]
    pub max_parallel_build_workers: usize,

    /// Concurrent partition scans within one query
    #[serde(default = "default_workers")]
    pub max_parallel_query_workers_per_probe: usize,

    /// Overall ceiling on maintenance (build) workers
    #[serde(default = "default_workers")]
    pub max_parallel_maintenance_workers: usize,
}

fn default_version() -> u32 {
    1
}
fn default_data_path() -> PathBuf {
    PathBuf::from(".ivfdex/data")
}
fn default_probes() -> usize {
    1
}
fn default_seed() -> u64 {
    42
}
fn default_max_iterations() -> usize {
    25
}
fn default_convergence_threshold() -> f32 {
    0.001
}
fn default_samples_per_list() -> usize {
    50
}
fn default_maintenance_memory_mb() -> u64 {
    64
}
fn default_workers() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_path: default_data_path(),
            debug: false,
            index: IndexConfig::default(),
            resources: ResourceConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::default(),
            lists: None,
            probes: default_probes(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            samples_per_list: default_samples_per_list(),
            query_timeout_ms: None,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            maintenance_memory_mb: default_maintenance_memory_mb(),
            max_parallel_build_workers: default_workers(),
            max_parallel_query_workers_per_probe: default_workers(),
            max_parallel_maintenance_workers: default_workers(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting; single underscores stay in field names
            .merge(Env::prefixed("IVFDEX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.ivfdex/settings.toml` from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join("settings.toml"))
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(
        dir: impl AsRef<std::path::Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.as_ref().join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# ivfdex configuration

# Version of the configuration schema
version = 1

# Directory for the vector snapshot and the persisted index
data_path = ".ivfdex/data"

# Global debug mode
debug = false

[index]
# Distance metric: "cosine", "euclidean" or "inner_product"
metric = "cosine"

# Number of partitions. Leave unset to derive ceil(sqrt(N)) from the store size.
# lists = 100

# Partitions scanned per query. probes = lists is an exhaustive search.
probes = 1

# Seed for sampling and centroid initialization (builds are reproducible per seed)
seed = 42

# K-means iteration cap and convergence threshold (fraction of reassigned samples)
max_iterations = 25
convergence_threshold = 0.001

# Training sample size per partition, before the memory cap applies
samples_per_list = 50

# Per-query time limit in milliseconds
# query_timeout_ms = 1000

[resources]
# Memory ceiling in MB for training samples and assignment buffers
maintenance_memory_mb = 64

# Workers for the parallel assignment pass (this machine has {} CPUs)
max_parallel_build_workers = 2

# Concurrent partition scans within one query
max_parallel_query_workers_per_probe = 2

# Overall ceiling on build workers
max_parallel_maintenance_workers = 2
"#,
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}

/// An applied resource configuration together with its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub version: u64,
    pub config: ResourceConfig,
}

/// Staged and applied resource configuration.
///
/// `configure` only stages a value; `apply` publishes it as a new versioned
/// snapshot. Readers load the applied snapshot with a single atomic pointer
/// read and keep it for the rest of their operation.
#[derive(Debug)]
pub struct ConfigRegistry {
    pending: Mutex<Option<ResourceConfig>>,
    applied: ArcSwap<ResourceSnapshot>,
}

impl ConfigRegistry {
    #[must_use]
    pub fn new(initial: ResourceConfig) -> Self {
        Self {
            pending: Mutex::new(None),
            applied: ArcSwap::from_pointee(ResourceSnapshot {
                version: 1,
                config: initial,
            }),
        }
    }

    /// Stages a configuration. Nothing observes it until [`Self::apply`].
    pub fn configure(&self, config: ResourceConfig) {
        *self.pending.lock() = Some(config);
    }

    /// Publishes the staged configuration, returning the snapshot now in effect.
    ///
    /// Without a staged configuration this is a no-op returning the current one.
    pub fn apply(&self) -> Arc<ResourceSnapshot> {
        let mut pending = self.pending.lock();
        let Some(config) = pending.take() else {
            return self.applied.load_full();
        };

        let next = Arc::new(ResourceSnapshot {
            version: self.applied.load().version + 1,
            config,
        });
        self.applied.store(Arc::clone(&next));
        info!(
            "Applied resource configuration v{}: memory={}MB build_workers={} query_workers_per_probe={} maintenance_workers={}",
            next.version,
            config.maintenance_memory_mb,
            config.max_parallel_build_workers,
            config.max_parallel_query_workers_per_probe,
            config.max_parallel_maintenance_workers
        );
        next
    }

    /// The snapshot in effect right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.applied.load_full()
    }

    #[must_use]
    pub fn pending(&self) -> Option<ResourceConfig> {
        *self.pending.lock()
    }
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new(ResourceConfig::default())
    }
}
