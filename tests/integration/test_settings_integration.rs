//! Test: Settings file generation and layering in an isolated directory

use ivfdex::{Catalog, DistanceMetric, Settings};
use tempfile::TempDir;

#[test]
fn test_generated_template_round_trips_through_figment() {
    let test_dir = TempDir::new().expect("Failed to create temp dir");
    let path = Settings::init_config_file(test_dir.path(), false).expect("Should create settings");
    assert!(path.ends_with(".ivfdex/settings.toml"));

    let settings = Settings::load_from(&path).expect("Template should parse");
    let defaults = Settings::default();
    assert_eq!(settings.index.metric, defaults.index.metric);
    assert_eq!(settings.index.probes, defaults.index.probes);
    assert_eq!(settings.resources, defaults.resources);
}

#[test]
fn test_file_values_reach_the_catalog() {
    let test_dir = TempDir::new().expect("Failed to create temp dir");
    let path = test_dir.path().join("settings.toml");
    std::fs::write(
        &path,
        "[index]\nmetric = \"l2\"\nprobes = 3\n\n[resources]\nmaintenance_memory_mb = 256\n",
    )
    .expect("Should write settings");

    // "l2" is an accepted alias only through FromStr, not serde
    assert!(Settings::load_from(&path).is_err());

    std::fs::write(
        &path,
        "[index]\nmetric = \"euclidean\"\nprobes = 3\n\n[resources]\nmaintenance_memory_mb = 256\n",
    )
    .expect("Should write settings");
    let settings = Settings::load_from(&path).expect("Should parse");
    assert_eq!(settings.index.metric, DistanceMetric::Euclidean);

    let catalog = Catalog::from_settings(&settings);
    let snapshot = catalog.configuration();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.config.maintenance_memory_mb, 256);
}
