//! Shapegate CLI
//!
//! - `validate`: load a shapes graph and a data set, commit the data in one
//!   validated transaction and print the report
//! - `load-test`: synthetic transactional load against a validating store

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod load_test;
mod validate;

#[derive(Parser)]
#[command(name = "shapegate")]
#[command(author, version, about = "Shapegate: transactional SHACL validation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a data set against a shapes graph.
    ///
    /// Exits with status 1 when the data does not conform.
    Validate {
        /// Shapes file (.ttl, .nt, .nq, .trig, .rdf)
        #[arg(long)]
        shapes: PathBuf,
        /// Data file, or a directory of RDF files
        #[arg(long)]
        data: PathBuf,
        /// JSON file with store configuration overrides
        #[arg(long)]
        config: Option<PathBuf>,
        /// Validate every shape against the whole graph
        #[arg(long)]
        bulk: bool,
        /// Validate shapes in parallel
        #[arg(long)]
        parallel: bool,
        /// Disable plan caching
        #[arg(long)]
        no_cache: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Synthetic load: commit `nodes` people in transactions of `batch`.
    LoadTest {
        #[arg(long, default_value_t = 100_000)]
        nodes: usize,
        #[arg(long, default_value_t = 1_000)]
        batch: usize,
        #[arg(long, value_enum, default_value_t = Approach::Incremental)]
        approach: Approach,
        #[arg(long)]
        parallel: bool,
        /// Make every n-th person invalid (0 = never)
        #[arg(long, default_value_t = 0)]
        invalid_every: usize,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Approach {
    Incremental,
    Bulk,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate {
            shapes,
            data,
            config,
            bulk,
            parallel,
            no_cache,
            json,
        } => validate::cmd_validate(&validate::ValidateArgs {
            shapes,
            data,
            config,
            bulk,
            parallel,
            no_cache,
            json,
        }),
        Commands::LoadTest {
            nodes,
            batch,
            approach,
            parallel,
            invalid_every,
            json,
        } => {
            load_test::cmd_load_test(&load_test::LoadTestArgs {
                nodes,
                batch,
                approach,
                parallel,
                invalid_every,
                json,
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
