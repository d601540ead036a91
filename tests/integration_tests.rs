//! Integration tests for the complete Shapegate pipeline
//!
//! These tests drive the validating store end to end:
//! - RDF files → ingest → shapes graph → transactions
//! - Incremental and bulk validation agreeing on the same changes
//! - Isolation levels under concurrent commits
//!
//! Run with: cargo test --test integration_tests

use proptest::prelude::*;
use shapegate_model::{vocab, Iri, Literal, Statement, StatementPattern, Term};
use shapegate_shacl::{
    IsolationLevel, Path, ShaclConfig, ShaclError, ShaclStore, Severity, TransactionSettings,
    ValidationApproach, ValidationMode,
};
use std::sync::{Arc, Barrier};

const EX: &str = "http://example.org/";

fn ex(local: &str) -> Term {
    Term::iri(&format!("{EX}{local}"))
}

fn pred(local: &str) -> Iri {
    Iri::new(format!("{EX}{local}"))
}

fn sh(local: &str) -> Iri {
    Iri::new(format!("{}{local}", vocab::sh::NS))
}

fn triple(s: &str, p: &str, o: &str) -> Statement {
    Statement::new(ex(s), pred(p), ex(o))
}

fn person(name: &str) -> Statement {
    Statement::new(ex(name), vocab::rdf::TYPE, ex("Person"))
}

/// `ex:PersonShape`: people know at least one other node via `ex:knows`.
fn knows_shapes() -> Vec<Statement> {
    let knows = Term::blank("knows");
    vec![
        Statement::new(ex("PersonShape"), vocab::rdf::TYPE, Term::iri(vocab::sh::NODE_SHAPE)),
        Statement::new(ex("PersonShape"), sh("targetClass"), ex("Person")),
        Statement::new(ex("PersonShape"), sh("property"), knows.clone()),
        Statement::new(knows.clone(), sh("path"), ex("knows")),
        Statement::new(knows, sh("minCount"), Literal::integer(1)),
    ]
}

fn store_with(shapes: Vec<Statement>, config: ShaclConfig) -> ShaclStore {
    let store = ShaclStore::new(config);
    store.load_shapes(shapes).expect("load shapes");
    store
}

// ============================================================================
// Files → store
// ============================================================================

#[test]
fn test_turtle_files_through_the_store() {
    use shapegate_ingest::load_file;
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let shapes_path = dir.path().join("shapes.ttl");
    std::fs::write(
        &shapes_path,
        r#"
@prefix ex: <http://example.org/> .
@prefix sh: <http://www.w3.org/ns/shacl#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

ex:PersonShape a sh:NodeShape ;
    sh:targetClass ex:Person ;
    sh:property [
        sh:path ex:age ;
        sh:maxCount 1 ;
        sh:datatype xsd:integer ;
    ] .
"#,
    )
    .unwrap();
    let data_path = dir.path().join("data.ttl");
    std::fs::write(
        &data_path,
        r#"
@prefix ex: <http://example.org/> .
ex:alice a ex:Person ; ex:age 42 .
ex:bob a ex:Person ; ex:age "forty" .
"#,
    )
    .unwrap();

    let store = store_with(load_file(&shapes_path).unwrap(), ShaclConfig::default());
    assert_eq!(store.shapes().len(), 2);

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    for st in load_file(&data_path).unwrap() {
        tx.add(st).unwrap();
    }
    let err = tx.commit().unwrap_err();
    let report = err.report().expect("validation report");
    assert_eq!(report.violation_count(), 1);
    assert_eq!(report.results[0].focus_node, ex("bob"));
    assert_eq!(report.results[0].value, Some(Term::literal("forty")));
    assert_eq!(
        report.results[0].constraint_component.as_str(),
        "http://www.w3.org/ns/shacl#DatatypeConstraintComponent"
    );
    assert!(store.data().is_empty());
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_scenario_a_min_count_violation() {
    let store = store_with(knows_shapes(), ShaclConfig::default());

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.add(person("lonely")).unwrap();
    let err = tx.commit().unwrap_err();

    let report = err.report().expect("validation report");
    assert_eq!(report.len(), 1);
    assert_eq!(report.results[0].focus_node, ex("lonely"));
    assert_eq!(
        report.results[0].constraint_component.as_str(),
        "http://www.w3.org/ns/shacl#MinCountConstraintComponent"
    );
    assert_eq!(report.results[0].source_shape, Term::blank("knows"));
    assert!(store.data().is_empty());
}

#[test]
fn test_scenario_b_inverse_path() {
    let children = Term::blank("children");
    let shapes = vec![
        Statement::new(ex("ParentShape"), sh("targetClass"), ex("Parent")),
        Statement::new(ex("ParentShape"), sh("property"), children.clone()),
        Statement::new(children.clone(), sh("path"), Term::blank("inv")),
        Statement::new(Term::blank("inv"), sh("inversePath"), ex("parentOf")),
        Statement::new(children, sh("minCount"), Literal::integer(1)),
    ];
    let store = store_with(shapes, ShaclConfig::default());
    let parent = Statement::new(ex("parent"), vocab::rdf::TYPE, ex("Parent"));

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.add(parent.clone()).unwrap();
    assert!(tx.commit().unwrap_err().report().is_some());

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.add(parent).unwrap();
    tx.add(triple("child", "parentOf", "parent")).unwrap();
    assert!(tx.commit().unwrap().conforms());

    let path = Path::parse(&store.shapes_graph().snapshot(), &Term::blank("inv")).unwrap();
    assert_eq!(path, Path::Inverse(Box::new(Path::Predicate(pred("parentOf")))));
    let focus = path.evaluate(&store.data().snapshot(), &ex("parent")).unwrap();
    assert_eq!(focus.into_iter().collect::<Vec<_>>(), vec![ex("child")]);

    // Dropping the only child breaks the parent through the inverse path.
    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.remove(&triple("child", "parentOf", "parent")).unwrap();
    let err = tx.commit().unwrap_err();
    assert_eq!(err.report().unwrap().results[0].focus_node, ex("parent"));
}

#[test]
fn test_scenario_c_one_or_more_path_falls_back() {
    let prop = Term::blank("reach");
    let path = Term::blank("plus");
    let shapes = vec![
        Statement::new(ex("S"), sh("targetClass"), ex("Person")),
        Statement::new(ex("S"), sh("property"), prop.clone()),
        Statement::new(prop.clone(), sh("path"), path.clone()),
        Statement::new(path, sh("oneOrMorePath"), ex("knows")),
        Statement::new(prop, sh("minCount"), Literal::integer(1)),
    ];
    let store = store_with(shapes, ShaclConfig::default());

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.add(person("a")).unwrap();
    tx.add(triple("a", "knows", "b")).unwrap();
    tx.add(triple("b", "knows", "c")).unwrap();
    assert!(tx.commit().unwrap().conforms());

    let stats = store.last_validation_stats().unwrap();
    assert_eq!(stats.mode, ValidationMode::Incremental);
    assert_eq!(stats.fallbacks, 1);

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.add(person("d")).unwrap();
    let err = tx.commit().unwrap_err();
    assert_eq!(err.report().unwrap().results[0].focus_node, ex("d"));
}

#[test]
fn test_scenario_d_disjoint_serializable_commits() {
    let store = store_with(knows_shapes(), ShaclConfig::default());
    let settings = TransactionSettings::new(IsolationLevel::Serializable);

    let mut first = store.begin(settings).unwrap();
    let mut second = store.begin(settings).unwrap();
    first.add(person("a")).unwrap();
    first.add(triple("a", "knows", "b")).unwrap();
    second.add(person("c")).unwrap();
    second.add(triple("c", "knows", "d")).unwrap();
    first.commit().unwrap();
    second.commit().unwrap();
    assert_eq!(store.data().len(), 4);

    // Same again from two threads that both begin before either commits.
    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        let handles: Vec<_> = ["e", "f"]
            .into_iter()
            .map(|name| {
                let store = &store;
                let barrier = &barrier;
                scope.spawn(move || -> Result<(), ShaclError> {
                    let mut tx = store.begin(settings)?;
                    tx.add(person(name))?;
                    tx.add(triple(name, "knows", "a"))?;
                    barrier.wait();
                    tx.commit().map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    });
    assert_eq!(store.data().len(), 8);
}

#[test]
fn test_scenario_e_revalidate_after_disabled_bulk_load() {
    const PEOPLE: usize = 50_000;

    let store = store_with(knows_shapes(), ShaclConfig::default());
    store.disable_validation();

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    for i in 0..PEOPLE {
        let name = format!("p{i}");
        tx.add(person(&name)).unwrap();
        let link = if i % 10_000 == 0 { "likes" } else { "knows" };
        tx.add(triple(&name, link, &format!("p{}", (i + 1) % PEOPLE))).unwrap();
    }
    assert!(tx.commit().unwrap().conforms());
    assert_eq!(store.data().len(), 2 * PEOPLE);

    store.enable_validation();
    let report = store.revalidate().unwrap();
    assert!(!report.conforms());
    let mut focus: Vec<_> = report.results.iter().map(|r| r.focus_node.clone()).collect();
    focus.sort();
    assert_eq!(
        focus,
        vec![ex("p0"), ex("p10000"), ex("p20000"), ex("p30000"), ex("p40000")]
    );
    assert_eq!(store.last_validation_stats().unwrap().mode, ValidationMode::Bulk);
}

// ============================================================================
// Isolation
// ============================================================================

/// `ex:knows` values must be people.
fn class_shapes() -> Vec<Statement> {
    let knows = Term::blank("knows");
    vec![
        Statement::new(ex("PersonShape"), sh("targetClass"), ex("Person")),
        Statement::new(ex("PersonShape"), sh("property"), knows.clone()),
        Statement::new(knows.clone(), sh("path"), ex("knows")),
        Statement::new(knows, sh("class"), ex("Person")),
    ]
}

/// Commits `a knows b` while another transaction removes `b a Person`.
fn concurrent_invalidation(config: ShaclConfig, isolation: IsolationLevel) -> Result<(), ShaclError> {
    let store = store_with(class_shapes(), config);
    store.data().insert_all([person("b")]);

    let mut tx = store.begin(TransactionSettings::new(isolation))?;
    tx.add(person("a"))?;
    tx.add(triple("a", "knows", "b"))?;

    let mut other = store.begin(TransactionSettings::default())?;
    other.remove(&person("b"))?;
    other.commit()?;

    tx.commit().map(|_| ())
}

#[test]
fn test_serializable_sees_concurrent_invalidation() {
    let err = concurrent_invalidation(ShaclConfig::default(), IsolationLevel::Serializable).unwrap_err();
    let report = err.report().expect("validation report");
    assert_eq!(report.results[0].value, Some(ex("b")));
}

#[test]
fn test_snapshot_without_recheck_allows_write_skew() {
    let config = ShaclConfig {
        serializable_validation: false,
        ..ShaclConfig::default()
    };
    concurrent_invalidation(config, IsolationLevel::Snapshot).unwrap();
}

#[test]
fn test_snapshot_reads_are_stable() {
    let store = store_with(knows_shapes(), ShaclConfig::default());
    let reader = store.begin(TransactionSettings::default()).unwrap();

    let mut writer = store.begin(TransactionSettings::default()).unwrap();
    writer.add(person("a")).unwrap();
    writer.add(triple("a", "knows", "b")).unwrap();
    writer.commit().unwrap();

    assert!(reader.statements(&StatementPattern::any()).unwrap().is_empty());
    let fresh = store.begin(TransactionSettings::default()).unwrap();
    assert_eq!(fresh.statements(&StatementPattern::any()).unwrap().len(), 2);
}

#[test]
fn test_shape_change_and_data_commit_never_both_slip_through() {
    let settings = TransactionSettings::new(IsolationLevel::Serializable);
    for round in 0..100 {
        let store = ShaclStore::new(ShaclConfig::default());
        let barrier = Barrier::new(2);
        let (shapes, data) = std::thread::scope(|scope| {
            let shapes = scope.spawn(|| {
                barrier.wait();
                store.load_shapes(knows_shapes()).map(|_| ())
            });
            let data = scope.spawn(|| -> Result<(), ShaclError> {
                let mut tx = store.begin(settings)?;
                tx.add(person(&format!("p{round}")))?;
                barrier.wait();
                tx.commit().map(|_| ())
            });
            (shapes.join().unwrap(), data.join().unwrap())
        });

        // Whichever lands second sees the other and is rejected.
        assert!(shapes.is_ok() != data.is_ok(), "round {round}: {shapes:?} / {data:?}");
        assert!(store.revalidate().unwrap().conforms(), "round {round}");
    }
}

// ============================================================================
// Reports
// ============================================================================

#[test]
fn test_warnings_do_not_block_commits() {
    let mut shapes = knows_shapes();
    shapes.push(Statement::new(Term::blank("knows"), sh("severity"), Term::iri(vocab::sh::WARNING)));
    let store = store_with(shapes, ShaclConfig::default());

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    tx.add(person("a")).unwrap();
    let report = tx.commit().unwrap();
    assert!(report.conforms());
    assert_eq!(report.len(), 1);
    assert_eq!(report.results[0].severity, Severity::Warning);
    assert_eq!(store.data().len(), 1);
}

#[test]
fn test_result_limits_truncate_reports() {
    let config = ShaclConfig {
        validation_results_limit_total: Some(2),
        ..ShaclConfig::default()
    };
    let store = store_with(knows_shapes(), config);

    let mut tx = store.begin(TransactionSettings::default()).unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        tx.add(person(name)).unwrap();
    }
    let err = tx.commit().unwrap_err();
    let report = err.report().unwrap();
    assert!(report.truncated);
    assert_eq!(report.len(), 2);
    assert!(!report.conforms());

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["truncated"], serde_json::Value::Bool(true));
}

// ============================================================================
// Plan caching
// ============================================================================

#[test]
fn test_cache_reduces_scans() {
    let mut shapes = knows_shapes();
    shapes.push(Statement::new(ex("IriShape"), sh("targetClass"), ex("Person")));
    shapes.push(Statement::new(ex("IriShape"), sh("nodeKind"), Term::iri(vocab::sh::IRI)));
    let data: Vec<Statement> = (0..50)
        .flat_map(|i| [person(&format!("p{i}")), triple(&format!("p{i}"), "knows", "x")])
        .collect();

    let run = |cache: bool| {
        let config = ShaclConfig {
            cache_select_nodes: cache,
            ..ShaclConfig::default()
        };
        let store = store_with(shapes.clone(), config);
        store.data().insert_all(data.clone());
        let report = store.revalidate().unwrap();
        (report, store.last_validation_stats().unwrap())
    };

    let (cached_report, cached) = run(true);
    let (plain_report, plain) = run(false);
    assert_eq!(cached_report, plain_report);
    assert!(cached_report.conforms());
    assert!(cached.cache_entries > 0);
    assert_eq!(plain.cache_entries, 0);
    assert!(cached.scans <= plain.scans);
    assert_eq!(cached.open_iterators, 0);
}

// ============================================================================
// Paths through the query engine
// ============================================================================

#[test]
fn test_path_patterns_match_direct_evaluation() {
    use shapegate_shacl::{Bindings, PatternQueryEngine, QueryEngine, Variable};
    use shapegate_store::MemoryStore;
    use std::collections::BTreeSet;

    let store = Arc::new(MemoryStore::new());
    store.insert_all([
        triple("a", "knows", "b"),
        triple("b", "knows", "c"),
        triple("c", "knows", "a"),
        triple("a", "likes", "c"),
    ]);
    let snapshot = store.snapshot();
    let nodes = ["a", "b", "c"].map(ex);
    let engine = PatternQueryEngine::new();
    let this = Variable::new("this");
    let value = Variable::new("value");

    let paths = [
        Path::Predicate(pred("knows")),
        Path::Inverse(Box::new(Path::Predicate(pred("knows")))),
        Path::Inverse(Box::new(Path::Inverse(Box::new(Path::Predicate(pred("likes")))))),
    ];
    for path in &paths {
        let pattern = path.render_as_pattern(&this, &value).unwrap();
        let query = format!("SELECT ?this ?value WHERE {{ {pattern} }}");
        let via_query: BTreeSet<(Term, Term)> = engine
            .select(&query, &Bindings::new(), &snapshot)
            .unwrap()
            .into_iter()
            .map(|b| (b[&this].clone(), b[&value].clone()))
            .collect();

        let mut direct = BTreeSet::new();
        for focus in &nodes {
            for v in path.evaluate(&snapshot, focus).unwrap() {
                direct.insert((focus.clone(), v));
            }
        }
        assert_eq!(via_query, direct, "path {path}");
    }

    let closure = Path::OneOrMore(Box::new(Path::Predicate(pred("knows"))));
    assert!(closure.render_as_pattern(&this, &value).is_err());
    assert_eq!(closure.evaluate(&snapshot, &ex("a")).unwrap().len(), 3);
}

// ============================================================================
// Incremental ⇔ bulk
// ============================================================================

/// People know one to two people; ages are single integers.
fn mixed_shapes() -> Vec<Statement> {
    let knows = Term::blank("knows");
    let age = Term::blank("age");
    vec![
        Statement::new(ex("PersonShape"), sh("targetClass"), ex("Person")),
        Statement::new(ex("PersonShape"), sh("property"), knows.clone()),
        Statement::new(ex("PersonShape"), sh("property"), age.clone()),
        Statement::new(knows.clone(), sh("path"), ex("knows")),
        Statement::new(knows.clone(), sh("minCount"), Literal::integer(1)),
        Statement::new(knows.clone(), sh("maxCount"), Literal::integer(2)),
        Statement::new(knows, sh("class"), ex("Person")),
        Statement::new(age.clone(), sh("path"), ex("age")),
        Statement::new(age.clone(), sh("maxCount"), Literal::integer(1)),
        Statement::new(age, sh("datatype"), Term::iri(vocab::xsd::INTEGER)),
    ]
}

const NODES: usize = 4;

/// Statement `index` of a small fixed universe.
fn universe(index: usize) -> Statement {
    let node = |i: usize| format!("n{}", i % NODES);
    match index {
        i if i < NODES => person(&node(i)),
        i if i < NODES + NODES * NODES => {
            let k = i - NODES;
            triple(&node(k / NODES), "knows", &node(k % NODES))
        }
        i => {
            let k = i - NODES - NODES * NODES;
            let age = if k % 3 == 2 {
                Literal::simple("old")
            } else {
                Literal::integer((k % 3) as i64)
            };
            Statement::new(ex(&node(k / 3)), pred("age"), age)
        }
    }
}

const UNIVERSE: usize = NODES + NODES * NODES + NODES * 3;

/// Inverse counts, pair components on `targetSubjectsOf`, a closed shape on
/// `targetObjectsOf` and a class check behind `sh:node`.
fn structural_shapes() -> Vec<Statement> {
    let children = Term::blank("children");
    let inv = Term::blank("inv");
    let likes = Term::blank("likes");
    let known = Term::blank("known");
    let ignored = Term::blank("ignored");
    vec![
        Statement::new(ex("ParentShape"), sh("targetClass"), ex("Parent")),
        Statement::new(ex("ParentShape"), sh("property"), children.clone()),
        Statement::new(children.clone(), sh("path"), inv.clone()),
        Statement::new(inv, sh("inversePath"), ex("parentOf")),
        Statement::new(children.clone(), sh("minCount"), Literal::integer(1)),
        Statement::new(children, sh("maxCount"), Literal::integer(2)),
        Statement::new(ex("LikerShape"), sh("targetSubjectsOf"), ex("likes")),
        Statement::new(ex("LikerShape"), sh("property"), likes.clone()),
        Statement::new(likes.clone(), sh("path"), ex("likes")),
        Statement::new(likes.clone(), sh("equals"), ex("knows")),
        Statement::new(likes, sh("disjoint"), ex("hates")),
        Statement::new(ex("KnownShape"), sh("targetObjectsOf"), ex("knows")),
        Statement::new(ex("KnownShape"), sh("closed"), Literal::boolean(true)),
        Statement::new(ex("KnownShape"), sh("ignoredProperties"), ignored.clone()),
        Statement::new(ignored.clone(), vocab::rdf::FIRST, Term::iri(vocab::rdf::TYPE)),
        Statement::new(ignored, vocab::rdf::REST, Term::iri(vocab::rdf::NIL)),
        Statement::new(ex("KnownShape"), sh("property"), known.clone()),
        Statement::new(known.clone(), sh("path"), ex("knows")),
        Statement::new(known, sh("node"), ex("PersonNode")),
        Statement::new(ex("PersonNode"), sh("class"), ex("Person")),
    ]
}

const SMALL: usize = 3;
const LINKS: [&str; 4] = ["knows", "likes", "hates", "parentOf"];

fn structural_universe(index: usize) -> Statement {
    let node = |i: usize| format!("n{}", i % SMALL);
    match index {
        i if i < SMALL => person(&node(i)),
        i if i < 2 * SMALL => Statement::new(ex(&node(i)), vocab::rdf::TYPE, ex("Parent")),
        i => {
            let k = i - 2 * SMALL;
            let link = LINKS[k / (SMALL * SMALL)];
            let k = k % (SMALL * SMALL);
            triple(&node(k / SMALL), link, &node(k % SMALL))
        }
    }
}

const STRUCTURAL_UNIVERSE: usize = 2 * SMALL + LINKS.len() * SMALL * SMALL;

/// Runs the same transactions incrementally and in bulk; both must agree on
/// every outcome and every report.
fn check_incremental_matches_bulk(
    shapes: fn() -> Vec<Statement>,
    universe: fn(usize) -> Statement,
    transactions: &[Vec<(bool, usize)>],
) -> Result<(), TestCaseError> {
    let incremental = store_with(shapes(), ShaclConfig::default());
    let bulk = store_with(shapes(), ShaclConfig::default());
    let bulk_settings = TransactionSettings::default().with_approach(ValidationApproach::Bulk);

    for ops in transactions {
        let mut left = incremental.begin(TransactionSettings::default()).unwrap();
        let mut right = bulk.begin(bulk_settings).unwrap();
        for &(add, index) in ops {
            let st = universe(index);
            if add {
                left.add(st.clone()).unwrap();
                right.add(st).unwrap();
            } else {
                left.remove(&st).unwrap();
                right.remove(&st).unwrap();
            }
        }

        match (left.commit(), right.commit()) {
            (Ok(l), Ok(r)) => prop_assert_eq!(l.results, r.results),
            (Err(l), Err(r)) => {
                let (l, r) = (l.report().unwrap(), r.report().unwrap());
                prop_assert_eq!(&l.results, &r.results);
            }
            (l, r) => prop_assert!(
                false,
                "incremental {:?} vs bulk {:?}",
                l.map(|report| report.len()),
                r.map(|report| report.len())
            ),
        }
        prop_assert_eq!(incremental.data().len(), bulk.data().len());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_incremental_matches_bulk(
        transactions in prop::collection::vec(
            prop::collection::vec((any::<bool>(), 0..UNIVERSE), 1..8),
            1..6,
        )
    ) {
        check_incremental_matches_bulk(mixed_shapes, universe, &transactions)?;
    }

    #[test]
    fn prop_incremental_matches_bulk_structural(
        transactions in prop::collection::vec(
            prop::collection::vec((any::<bool>(), 0..STRUCTURAL_UNIVERSE), 1..6),
            1..8,
        )
    ) {
        check_incremental_matches_bulk(structural_shapes, structural_universe, &transactions)?;
    }
}
