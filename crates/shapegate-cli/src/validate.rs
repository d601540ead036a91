//! `shapegate validate`

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use shapegate_ingest::RdfFormat;
use shapegate_model::Statement;
use shapegate_shacl::{
    ShaclConfig, ShaclStore, TransactionSettings, ValidationApproach, ValidationReport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use walkdir::WalkDir;

pub struct ValidateArgs {
    pub shapes: PathBuf,
    pub data: PathBuf,
    pub config: Option<PathBuf>,
    pub bulk: bool,
    pub parallel: bool,
    pub no_cache: bool,
    pub json: bool,
}

pub fn load_config(path: Option<&Path>) -> Result<ShaclConfig> {
    let Some(path) = path else {
        return Ok(ShaclConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    ShaclConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// A single RDF file, or every RDF file under a directory (sorted by name).
fn load_data(path: &Path) -> Result<Vec<Statement>> {
    if !path.is_dir() {
        return shapegate_ingest::load_file(path).with_context(|| format!("failed to load {}", path.display()));
    }

    let mut statements = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_rdf = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(RdfFormat::from_extension)
            .is_some();
        if !is_rdf {
            continue;
        }
        statements.extend(
            shapegate_ingest::load_file(entry.path())
                .with_context(|| format!("failed to load {}", entry.path().display()))?,
        );
    }
    if statements.is_empty() {
        tracing::warn!(dir = %path.display(), "no RDF statements found");
    }
    Ok(statements)
}

pub fn cmd_validate(args: &ValidateArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    if args.parallel {
        config.parallel_validation = true;
    }
    if args.no_cache {
        config.cache_select_nodes = false;
    }

    let store = ShaclStore::new(config);

    let shapes = shapegate_ingest::load_file(&args.shapes)
        .with_context(|| format!("failed to load shapes {}", args.shapes.display()))?;
    let shape_statements = shapes.len();
    store
        .load_shapes(shapes)
        .with_context(|| format!("invalid shapes graph {}", args.shapes.display()))?;

    let data = load_data(&args.data)?;
    let data_statements = data.len();

    let mut settings = TransactionSettings::default()
        .parallel(args.parallel)
        .cache(!args.no_cache);
    if args.bulk {
        settings = settings.with_approach(ValidationApproach::Bulk);
    }

    let mut tx = store.begin(settings)?;
    for statement in data {
        tx.add(statement)?;
    }
    let (report, committed) = match tx.commit() {
        Ok(report) => (report, true),
        Err(e) => match e.report() {
            Some(report) => (report.clone(), false),
            None => return Err(anyhow!(e).context("validation failed")),
        },
    };

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report, shape_statements, data_statements, &store);
    }

    Ok(if committed && report.conforms() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &ValidationReport, shape_statements: usize, data_statements: usize, store: &ShaclStore) {
    println!(
        "{} {} shape(s) from {} statement(s), {} data statement(s)",
        "Loaded".cyan(),
        store.shapes().len(),
        shape_statements,
        data_statements
    );
    if let Some(stats) = store.last_validation_stats() {
        println!(
            "{} {:?} validation, {} shape(s), {} fallback(s), {:?}",
            "Ran".cyan(),
            stats.mode,
            stats.shapes,
            stats.fallbacks,
            stats.elapsed
        );
    }

    if report.conforms() {
        println!("{}", "✓ conforms".green().bold());
    } else {
        println!(
            "{} ({} violation(s))",
            "✗ does not conform".red().bold(),
            report.violation_count()
        );
    }
    for result in &report.results {
        let line = result.to_string();
        if result.is_violation() {
            println!("  {}", line.red());
        } else {
            println!("  {}", line.yellow());
        }
    }
    if report.truncated {
        println!("  {}", "(results truncated)".dimmed());
    }
}
