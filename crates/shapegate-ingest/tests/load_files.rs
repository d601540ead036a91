use shapegate_ingest::{load_file, load_file_into, IngestError, RdfFormat};
use shapegate_model::{Iri, Term};
use std::fs;

const TRIG: &str = r#"
@prefix ex: <http://example.org/> .

ex:a ex:p ex:b .

ex:g1 {
    ex:a ex:p ex:c .
    ex:c ex:q "v" .
}
"#;

#[test]
fn load_trig_file_keeps_named_graphs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.trig");
    fs::write(&path, TRIG).unwrap();

    let statements = load_file(&path).unwrap();
    assert_eq!(statements.len(), 3);
    let g1 = Term::iri("http://example.org/g1");
    assert_eq!(statements.iter().filter(|s| s.context.as_ref() == Some(&g1)).count(), 2);
}

#[test]
fn load_file_into_fills_default_graph_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.trig");
    fs::write(&path, TRIG).unwrap();

    let shapes = Iri::new("urn:shapegate:shapes-graph");
    let statements = load_file_into(&path, &shapes).unwrap();
    let g1 = Term::iri("http://example.org/g1");
    let shapes = Term::Iri(shapes);
    assert_eq!(statements.iter().filter(|s| s.context.as_ref() == Some(&shapes)).count(), 1);
    assert_eq!(statements.iter().filter(|s| s.context.as_ref() == Some(&g1)).count(), 2);
}

#[test]
fn load_rdf_xml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("onto.rdf");
    fs::write(
        &path,
        r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:ex="http://example.org/">
  <rdf:Description rdf:about="http://example.org/alice">
    <ex:name>Alice</ex:name>
  </rdf:Description>
</rdf:RDF>
"#,
    )
    .unwrap();

    let statements = load_file(&path).unwrap();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].subject, Term::iri("http://example.org/alice"));
    assert_eq!(statements[0].object, Term::literal("Alice"));
}

#[test]
fn missing_and_unknown_files_fail() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.ttl");
    assert!(matches!(load_file(&missing), Err(IngestError::Io { .. })));

    let unknown = dir.path().join("data.json");
    fs::write(&unknown, "{}").unwrap();
    assert!(matches!(load_file(&unknown), Err(IngestError::UnsupportedFormat(_))));
    assert_eq!(RdfFormat::from_extension("json"), None);
}
