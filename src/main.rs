//! # evidex CLI
//!
//! ```bash
//! evidex --config ./evidex.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `evidex chunk <file>` | Show how one file is chunked |
//! | `evidex build <paths…>` | Build (or reuse) the index in `index.cache_dir` |
//! | `evidex search "<query>"` | Hybrid search over the built index |
//! | `evidex stats` | Index metadata and retrieval metrics |
//! | `evidex bench --dataset <jsonl>` | Run the retrieval benchmark |
//! | `evidex completions <shell>` | Print shell completions |
//!
//! Logging goes to stderr; set `RUST_LOG` to override the default
//! `evidex=info` filter.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use evidex::bench::{self, BenchOptions};
use evidex::config::{self, Config};
use evidex::{ingest, search, stats};

/// Used when `RUST_LOG` is unset; covers the app and core crates.
const DEFAULT_LOG_FILTER: &str = "evidex=info,evidex_core=info";

/// Document indexing and hybrid (dense + BM25) retrieval.
#[derive(Parser)]
#[command(name = "evidex", version)]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults apply when
    /// omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and chunk a single file without indexing it.
    Chunk {
        path: PathBuf,
    },

    /// Index files and directories into the cache directory.
    ///
    /// Reuses the existing index when the chunked corpus and embedding
    /// model are unchanged.
    Build {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Rebuild even if the cached index matches.
        #[arg(long)]
        force: bool,
    },

    /// Search the built index.
    Search {
        query: String,

        /// Number of results (default: `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Dense weight in [0, 1] (default: `retrieval.alpha`).
        #[arg(long)]
        alpha: Option<f64>,

        /// Print evidence as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index metadata and the metrics summary.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Measure Top-K hit rates against a JSONL dataset.
    Bench {
        #[arg(long)]
        dataset: PathBuf,

        /// Corpus files. When omitted, the samples' `corpus_hint`s are used.
        #[arg(long, num_args = 1..)]
        corpus: Vec<PathBuf>,

        /// Base directory for relative hints (default: the dataset's directory).
        #[arg(long)]
        corpus_root: Option<PathBuf>,

        /// Write the metrics summary as JSON to this path.
        #[arg(long)]
        summary_output: Option<PathBuf>,

        /// List queries whose answers were not retrieved.
        #[arg(long)]
        print_misses: bool,
    },

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "evidex", &mut std::io::stdout());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Chunk { path } => {
            ingest::run_chunk_preview(&cfg, &path)?;
        }
        Commands::Build { paths, force } => {
            ingest::run_build(&cfg, &paths, force).await?;
        }
        Commands::Search {
            query,
            top_k,
            alpha,
            json,
        } => {
            search::run_search(&cfg, &query, top_k, alpha, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json)?;
        }
        Commands::Bench {
            dataset,
            corpus,
            corpus_root,
            summary_output,
            print_misses,
        } => {
            let options = BenchOptions {
                dataset,
                corpus,
                corpus_root,
                summary_output,
            };
            let report = bench::run_benchmark(&cfg, &options).await?;
            bench::print_report(&report, print_misses);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
