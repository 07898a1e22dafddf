//! accrete CLI entry point

use accrete::{
    commands::{
        cmd_age_store, cmd_attributions, cmd_export_graph, cmd_init, cmd_rebuild_graph,
        cmd_rescore, cmd_run, cmd_status, print_age_stats, print_attributions, print_graph_stats,
        print_rescore_report, print_run_summary, print_status, RunOptions,
    },
    config::Config,
    error::Result,
    progress::LogWriterFactory,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "accrete")]
#[command(version, about = "Ethics-gated content ingestion and knowledge accretion", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and the root skeleton
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run one ingestion cycle (or cycle continuously)
    Run {
        /// Keep cycling until interrupted
        #[arg(long)]
        continuous: bool,

        /// Only run these source tags
        #[arg(long)]
        source: Option<Vec<String>>,

        /// Stop after this many cycles in continuous mode
        #[arg(long)]
        max_cycles: Option<u64>,
    },

    /// Show metrics, graph size, dedup count and store usage
    Status,

    /// Move aged objects between store tiers
    AgeStore {
        /// Skip removing stray temp files
        #[arg(long)]
        no_sweep: bool,
    },

    /// Export the knowledge graph in visualization form
    ExportGraph {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rebuild the knowledge graph from the store
    RebuildGraph,

    /// Recompute alignment scores for stored records
    Rescore,

    /// Show recent attribution rows
    Attributions {
        /// Maximum number of rows
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let event_layer = open_event_log(&config_path).map(|file| {
        fmt::layer()
            .json()
            .with_writer(Mutex::new(file))
            .with_filter(Targets::new().with_target("accrete::ingest", LevelFilter::INFO))
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(LogWriterFactory::default())
                .with_filter(filter),
        )
        .with(event_layer)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        return handle_init(&config_path, force);
    }

    // Handle completions command (doesn't need config)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "accrete", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&config_path)?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Run {
            continuous,
            source,
            max_cycles,
        } => {
            let options = RunOptions {
                continuous,
                sources: source.unwrap_or_default(),
                max_cycles,
                show_progress: !cli.json,
            };
            let summaries = cmd_run(config, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_run_summary(&summaries);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::AgeStore { no_sweep } => {
            let stats = cmd_age_store(&config, !no_sweep)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_age_stats(&stats);
            }
        }

        Commands::ExportGraph { output } => {
            let vis = cmd_export_graph(&config, output.as_deref())?;

            match output {
                Some(path) if !cli.json => println!(
                    "✓ Exported {} nodes and {} edges to {}",
                    vis.nodes.len(),
                    vis.edges.len(),
                    path.display()
                ),
                _ => println!("{}", serde_json::to_string_pretty(&vis)?),
            }
        }

        Commands::RebuildGraph => {
            let stats = cmd_rebuild_graph(config)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_graph_stats(&stats);
            }
        }

        Commands::Rescore => {
            let report = cmd_rescore(config)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_rescore_report(&report);
            }
        }

        Commands::Attributions { limit } => {
            let report = cmd_attributions(&config, limit)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_attributions(&report);
            }
        }
    }

    Ok(())
}

/// `--config` may name a `.toml` file or a root directory
fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) if p.extension().is_some_and(|e| e == "toml") => p.to_path_buf(),
        Some(p) => p.join("config.toml"),
        None => Config::default_config_path(),
    }
}

/// Open `<root>/logs/ingestion.log` for appending once the root exists
fn open_event_log(config_path: &Path) -> Option<File> {
    let root = config_path.parent()?;
    if !root.is_dir() {
        return None;
    }
    let logs = root.join("logs");
    std::fs::create_dir_all(&logs).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs.join("ingestion.log"))
        .ok()
}

fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        eprintln!(
            "Config file not found at: {}\nRun 'accrete init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }
    Config::load(config_path)
}

fn handle_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        eprintln!(
            "Config file already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        );
        std::process::exit(1);
    }

    let base_dir = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_base_dir);
    let config = cmd_init(Some(base_dir), force)?;

    println!("✓ accrete initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("\nNext steps:");
    println!("  1. Add focus items and keywords to the config file");
    println!("  2. Run one cycle: accrete run");
    println!("  3. Check progress: accrete status");
    Ok(())
}
