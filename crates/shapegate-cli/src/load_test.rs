//! Synthetic load against the transaction API.
//!
//! Not a microbenchmark. Answers "how many statements per second can a
//! validating store commit at batch size M?" Run in release mode:
//!
//! ```bash
//! cargo run -p shapegate-cli --release -- load-test --nodes 200000 --batch 1000
//! ```

use crate::Approach;
use anyhow::{bail, Result};
use serde::Serialize;
use shapegate_model::{vocab, Literal, Statement, Term};
use shapegate_shacl::{ShaclConfig, ShaclStore, TransactionSettings, ValidationApproach};
use std::time::{Duration, Instant};

const EX: &str = "http://example.org/";

pub struct LoadTestArgs {
    pub nodes: usize,
    pub batch: usize,
    pub approach: Approach,
    pub parallel: bool,
    pub invalid_every: usize,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct LoadTestReport {
    version: String,
    nodes: usize,
    batch: usize,
    approach: String,
    parallel: bool,
    transactions: usize,
    committed: usize,
    rejected: usize,
    statements: usize,
    elapsed_ms: u128,
    statements_per_sec: f64,
    slowest_commit_ms: u128,
    fallbacks: usize,
}

fn ex(local: &str) -> Term {
    Term::iri(&format!("{EX}{local}"))
}

/// `ex:PersonShape`: every person has one string name, at most one
/// non-negative age, and only knows other people.
pub fn person_shapes() -> Vec<Statement> {
    let shape = ex("PersonShape");
    let name = Term::blank("name");
    let age = Term::blank("age");
    let knows = Term::blank("knows");
    vec![
        Statement::new(shape.clone(), vocab::rdf::TYPE, Term::iri(vocab::sh::NODE_SHAPE)),
        Statement::new(shape.clone(), vocab::sh::TARGET_CLASS, ex("Person")),
        Statement::new(shape.clone(), vocab::sh::PROPERTY, name.clone()),
        Statement::new(shape.clone(), vocab::sh::PROPERTY, age.clone()),
        Statement::new(shape, vocab::sh::PROPERTY, knows.clone()),
        Statement::new(name.clone(), vocab::sh::PATH, ex("name")),
        Statement::new(name.clone(), vocab::sh::MIN_COUNT, Literal::integer(1)),
        Statement::new(name, vocab::sh::DATATYPE, Term::iri(vocab::xsd::STRING)),
        Statement::new(age.clone(), vocab::sh::PATH, ex("age")),
        Statement::new(age.clone(), vocab::sh::MAX_COUNT, Literal::integer(1)),
        Statement::new(age, vocab::sh::MIN_INCLUSIVE, Literal::integer(0)),
        Statement::new(knows.clone(), vocab::sh::PATH, ex("knows")),
        Statement::new(knows, vocab::sh::CLASS, ex("Person")),
    ]
}

/// Statements for person `i`, optionally knowing an earlier person.
pub fn person(i: usize, knows: Option<usize>, valid: bool) -> Vec<Statement> {
    let node = ex(&format!("person{i}"));
    let mut out = vec![
        Statement::new(node.clone(), vocab::rdf::TYPE, ex("Person")),
        Statement::new(node.clone(), format!("{EX}age").as_str(), Literal::integer((i % 90) as i64)),
    ];
    if valid {
        out.push(Statement::new(
            node.clone(),
            format!("{EX}name").as_str(),
            Term::literal(&format!("Person {i}")),
        ));
    }
    if let Some(other) = knows {
        out.push(Statement::new(node, format!("{EX}knows").as_str(), ex(&format!("person{other}"))));
    }
    out
}

pub fn cmd_load_test(args: &LoadTestArgs) -> Result<()> {
    if args.batch == 0 {
        bail!("--batch must be at least 1");
    }

    let config = ShaclConfig {
        parallel_validation: args.parallel,
        ..ShaclConfig::default()
    };
    let store = ShaclStore::new(config);
    store.load_shapes(person_shapes())?;

    let approach = match args.approach {
        Approach::Incremental => ValidationApproach::Incremental,
        Approach::Bulk => ValidationApproach::Bulk,
    };
    let settings = TransactionSettings::default()
        .with_approach(approach)
        .parallel(args.parallel);

    let mut transactions = 0usize;
    let mut committed = 0usize;
    let mut rejected = 0usize;
    let mut statements = 0usize;
    let mut fallbacks = 0usize;
    let mut slowest = Duration::ZERO;
    let started = Instant::now();

    let mut next = 0usize;
    while next < args.nodes {
        let end = (next + args.batch).min(args.nodes);
        let mut tx = store.begin(settings)?;
        let mut batch_statements = 0usize;
        for i in next..end {
            let valid = args.invalid_every == 0 || (i + 1) % args.invalid_every != 0;
            // Links never cross batches.
            let knows = (i > next).then(|| i - 1);
            for st in person(i, knows, valid) {
                batch_statements += 1;
                tx.add(st)?;
            }
        }

        let commit_started = Instant::now();
        let outcome = tx.commit();
        slowest = slowest.max(commit_started.elapsed());
        transactions += 1;
        match outcome {
            Ok(_) => {
                committed += 1;
                statements += batch_statements;
            }
            Err(e) if e.report().is_some() => {
                rejected += 1;
                tracing::debug!(batch = transactions, "batch rejected: {e}");
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(stats) = store.last_validation_stats() {
            fallbacks += stats.fallbacks;
        }
        next = end;
    }

    let elapsed = started.elapsed();
    let report = LoadTestReport {
        version: "load_test_v1".to_string(),
        nodes: args.nodes,
        batch: args.batch,
        approach: format!("{:?}", args.approach).to_lowercase(),
        parallel: args.parallel,
        transactions,
        committed,
        rejected,
        statements,
        elapsed_ms: elapsed.as_millis(),
        statements_per_sec: statements as f64 / elapsed.as_secs_f64().max(1e-9),
        slowest_commit_ms: slowest.as_millis(),
        fallbacks,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("load-test");
        println!("  nodes={} batch={} approach={} parallel={}", report.nodes, report.batch, report.approach, report.parallel);
        println!(
            "  transactions={} committed={} rejected={}",
            report.transactions, report.committed, report.rejected
        );
        println!("  statements={} elapsed={:?}", report.statements, elapsed);
        println!("  throughput={:.0} statements/s", report.statements_per_sec);
        println!("  slowest_commit={}ms fallbacks={}", report.slowest_commit_ms, report.fallbacks);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_statements() {
        assert_eq!(person(0, None, true).len(), 3);
        assert_eq!(person(5, Some(4), true).len(), 4);
        let invalid = person(5, None, false);
        assert!(invalid
            .iter()
            .all(|st| st.predicate.as_str() != format!("{EX}name")));
    }

    #[test]
    fn test_invalid_batches_are_rejected() {
        let store = ShaclStore::new(ShaclConfig::default());
        store.load_shapes(person_shapes()).unwrap();

        let mut tx = store.begin(TransactionSettings::default()).unwrap();
        for st in person(0, None, true).into_iter().chain(person(1, Some(0), true)) {
            tx.add(st).unwrap();
        }
        assert!(tx.commit().unwrap().conforms());

        let mut tx = store.begin(TransactionSettings::default()).unwrap();
        for st in person(2, Some(1), false) {
            tx.add(st).unwrap();
        }
        let err = tx.commit().unwrap_err();
        assert_eq!(err.report().unwrap().violation_count(), 1);
    }
}
