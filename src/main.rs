//! CLI entry point for the ivfdex vector index.
//!
//! Provides commands for importing vectors, building the index and querying it.
//! State lives under `data_path` from the settings: a vector snapshot plus the
//! persisted partition table.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use ivfdex::vector::{recall, suggested_lists};
use ivfdex::{
    BuildParams, ConfigRegistry, DistanceMetric, ResourceBudget, SearchParams, Settings,
    VectorDimension, VectorId, VectorIndexEngine,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// IVFFlat vector index
#[derive(Parser)]
#[command(
    name = "ivfdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "IVFFlat approximate nearest neighbor index",
    long_about = "Import vectors, partition them with k-means and run approximate nearest neighbor queries.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .ivfdex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Import vectors from a JSON Lines file
    #[command(
        about = "Import vectors from JSON Lines",
        after_help = "Each line is an object: {\"id\": 1, \"vector\": [0.1, 0.2, ...]}\nExisting ids are overwritten."
    )]
    Import {
        /// Path to the .jsonl file
        path: PathBuf,
    },

    /// Train centroids and partition the store
    #[command(
        about = "Build the index",
        after_help = "Examples:\n  ivfdex build\n  ivfdex build --lists 100 --metric cosine"
    )]
    Build {
        /// Partition count (defaults to settings, then ceil(sqrt(N)))
        #[arg(short, long)]
        lists: Option<usize>,

        /// Distance metric: cosine, euclidean or inner_product
        #[arg(short, long)]
        metric: Option<DistanceMetric>,
    },

    /// Approximate nearest neighbor query
    #[command(
        about = "Search the index",
        after_help = "Examples:\n  ivfdex search --vector \"0.1,0.2,0.3\" -k 5 --probes 10"
    )]
    Search {
        /// Query vector as comma-separated components
        #[arg(long)]
        vector: String,

        /// Number of neighbors
        #[arg(short, default_value = "10")]
        k: usize,

        /// Partitions to scan (defaults to settings)
        #[arg(short, long)]
        probes: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show store and index statistics
    #[command(about = "Display index statistics")]
    Info {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Measure recall against exact search
    #[command(
        about = "Measure recall@k against brute-force search",
        long_about = "Uses stored vectors as queries and compares approximate results with an exhaustive scan."
    )]
    Recall {
        /// Number of query vectors
        #[arg(short, long, default_value = "100")]
        queries: usize,

        /// Number of neighbors
        #[arg(short, default_value = "10")]
        k: usize,

        /// Partitions to scan (defaults to settings)
        #[arg(short, long)]
        probes: Option<usize>,
    },
}

#[derive(Debug, Deserialize)]
struct ImportRecord {
    id: u32,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    dimension: usize,
    vectors: usize,
    suggested_lists: usize,
    index: Option<ivfdex::IndexStats>,
    metric: Option<DistanceMetric>,
    build: Option<ivfdex::vector::BuildInfo>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow::anyhow!("Failed to load configuration from {}: {e}", path.display())
        })?,
        None => Settings::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?,
    };

    init_logging(cli.verbose || settings.debug);
    debug!("Using data path {}", settings.data_path.display());

    run(cli.command, &settings)
}

fn run(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(".", force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(settings)?);
        }

        Commands::Import { path } => import(settings, &path)?,

        Commands::Build { lists, metric } => {
            let engine = open_engine(&settings.data_path)?;
            let mut params = BuildParams::from_config(&settings.index);
            if lists.is_some() {
                params.lists = lists;
            }
            if let Some(metric) = metric {
                params.metric = metric;
            }

            let started = Instant::now();
            let stats = engine.build(&params, budget(settings), None)?;
            engine.save(&settings.data_path)?;
            println!(
                "Built {} lists over {} vectors in {:.2?} ({} empty partitions, list length {}..{}, mean {:.1})",
                stats.lists,
                stats.vectors,
                started.elapsed(),
                stats.empty_partitions,
                stats.min_list_len,
                stats.max_list_len,
                stats.mean_list_len
            );
        }

        Commands::Search {
            vector,
            k,
            probes,
            json,
        } => {
            let engine = open_engine(&settings.data_path)?;
            let query = parse_vector(&vector)?;
            let params = search_params(settings, k, probes);
            let results = engine.search(&query, params, budget(settings))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for (rank, neighbor) in results.iter().enumerate() {
                    println!("{:>3}. id {:<10} distance {:.6}", rank + 1, neighbor.id, neighbor.distance);
                }
            }
        }

        Commands::Info { json } => {
            let engine = open_engine(&settings.data_path)?;
            let table = engine.table();
            let output = InfoOutput {
                dimension: engine.dimension().get(),
                vectors: engine.store().len(),
                suggested_lists: suggested_lists(engine.store().len()),
                index: engine.stats(),
                metric: table.as_ref().map(|t| t.metric()),
                build: table.as_ref().map(|t| *t.build_info()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Dimension:       {}", output.dimension);
                println!("Vectors:         {}", output.vectors);
                println!("Suggested lists: {}", output.suggested_lists);
                match (output.index, output.metric, output.build) {
                    (Some(stats), Some(metric), Some(build)) => {
                        println!("Metric:          {metric}");
                        println!("Lists:           {}", stats.lists);
                        println!("Indexed:         {}", stats.vectors);
                        println!("Empty lists:     {}", stats.empty_partitions);
                        println!(
                            "List length:     min {} / max {} / mean {:.1}",
                            stats.min_list_len, stats.max_list_len, stats.mean_list_len
                        );
                        println!(
                            "Training:        seed {}, sample {}, {} iterations, converged {}",
                            build.seed, build.sample_size, build.iterations, build.converged
                        );
                    }
                    _ => println!("Index:           not built (run 'ivfdex build')"),
                }
            }
        }

        Commands::Recall { queries, k, probes } => {
            if queries == 0 {
                bail!("--queries must be at least 1");
            }
            let engine = open_engine(&settings.data_path)?;
            let params = search_params(settings, k, probes);
            let budget = budget(settings);
            let snapshot = engine.store().snapshot();
            if snapshot.is_empty() {
                bail!("The vector store is empty; import vectors first");
            }

            let step = query_step(snapshot.len(), queries);
            let mut total = 0.0;
            let mut count = 0usize;
            let started = Instant::now();
            for (_, query) in snapshot.iter().step_by(step).take(queries) {
                let approx = engine.search(query, params, budget)?;
                let exact = engine.search_exact(query, k)?;
                total += recall(&approx, &exact);
                count += 1;
            }
            println!(
                "recall@{k} with probes={} over {count} queries: {:.4} ({:.2?} total)",
                params.probes,
                total / count as f64,
                started.elapsed()
            );
        }
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn budget(settings: &Settings) -> ResourceBudget {
    let registry = ConfigRegistry::new(settings.resources);
    ResourceBudget::from_snapshot(&registry.snapshot())
}

fn search_params(settings: &Settings, k: usize, probes: Option<usize>) -> SearchParams {
    let params = SearchParams::new(k).with_probes(probes.unwrap_or(settings.index.probes));
    match settings.index.query_timeout_ms {
        Some(ms) => params.with_timeout(std::time::Duration::from_millis(ms)),
        None => params,
    }
}

fn open_engine(data_path: &Path) -> Result<VectorIndexEngine> {
    if !VectorIndexEngine::exists(data_path) {
        bail!(
            "No vectors found in {}. Run 'ivfdex import <file.jsonl>' first",
            data_path.display()
        );
    }
    VectorIndexEngine::load(data_path)
        .with_context(|| format!("Failed to load index from {}", data_path.display()))
}

fn import(settings: &Settings, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut engine: Option<VectorIndexEngine> = if VectorIndexEngine::exists(&settings.data_path) {
        Some(open_engine(&settings.data_path)?)
    } else {
        None
    };

    let mut imported = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), line_no + 1))?;
        let Some(id) = VectorId::new(record.id) else {
            bail!("{}:{}: vector id must be non-zero", path.display(), line_no + 1);
        };

        // The first record fixes the dimension of a new store
        if engine.is_none() {
            let dimension = VectorDimension::new(record.vector.len())?;
            info!("Creating store with {} dimensions", dimension.get());
            engine = Some(VectorIndexEngine::with_dimension(dimension));
        }
        let Some(target) = engine.as_ref() else {
            continue;
        };
        target
            .insert(id, &record.vector)
            .with_context(|| format!("{}:{}: rejected vector {id}", path.display(), line_no + 1))?;
        imported += 1;
    }

    let Some(engine) = engine else {
        bail!("{} contains no vectors", path.display());
    };
    engine.save(&settings.data_path)?;
    println!(
        "Imported {imported} vectors ({} total, {} dimensions)",
        engine.store().len(),
        engine.dimension().get()
    );
    if engine.is_built() {
        println!("New vectors were appended to the existing index; run 'ivfdex build' to repartition.");
    }
    Ok(())
}

/// Stride that spreads `queries` picks evenly over `available` vectors.
fn query_step(available: usize, queries: usize) -> usize {
    (available / queries.max(1)).max(1)
}

fn parse_vector(input: &str) -> Result<Vec<f32>> {
    input
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid vector component '{}'", part.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_rejects_zero_queries() {
        let cli = Cli::try_parse_from(["ivfdex", "recall", "--queries", "0"]).unwrap();
        assert!(matches!(cli.command, Commands::Recall { queries: 0, .. }));

        let temp = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            data_path: temp.path().to_path_buf(),
            ..Settings::default()
        };
        let engine = VectorIndexEngine::with_dimension(VectorDimension::new(2).unwrap());
        engine.insert(VectorId::new(1).unwrap(), &[1.0, 0.0]).unwrap();
        engine.insert(VectorId::new(2).unwrap(), &[0.0, 1.0]).unwrap();
        engine
            .build(
                &BuildParams {
                    lists: Some(1),
                    ..BuildParams::default()
                },
                budget(&settings),
                None,
            )
            .unwrap();
        engine.save(&settings.data_path).unwrap();

        let err = run(cli.command, &settings).unwrap_err();
        assert!(err.to_string().contains("--queries must be at least 1"));
    }

    #[test]
    fn test_query_step() {
        assert_eq!(query_step(1_000, 100), 10);
        assert_eq!(query_step(5, 100), 1);
        assert_eq!(query_step(0, 1), 1);
    }

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("0.5, -1,2").unwrap(), vec![0.5, -1.0, 2.0]);
        assert!(parse_vector("0.5,x").is_err());
    }
}
