//! RDF loading for Shapegate.
//!
//! Parses N-Triples, Turtle, N-Quads, TriG and RDF/XML with sophia and
//! turns the parsed triples into [`Statement`]s. Named graphs of quad
//! formats become statement contexts.
//!
//! Term conversion goes through the N-Triples display form of each sophia
//! term, so the model stays independent of the parser's term types.

use shapegate_model::{ntriples, Iri, Statement, Term};
use sophia::api::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported RDF file extension: {0} (expected .nt/.ttl/.nq/.trig/.rdf/.owl/.xml)")]
    UnsupportedFormat(String),
    #[error("failed to parse {format}: {message}")]
    Parse { format: RdfFormat, message: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RdfFormat {
    NTriples,
    Turtle,
    NQuads,
    TriG,
    RdfXml,
}

impl RdfFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "nt" | "ntriples" => Some(Self::NTriples),
            "ttl" | "turtle" => Some(Self::Turtle),
            "nq" | "nquads" => Some(Self::NQuads),
            "trig" => Some(Self::TriG),
            "rdf" | "owl" | "xml" => Some(Self::RdfXml),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NTriples => "N-Triples",
            Self::Turtle => "Turtle",
            Self::NQuads => "N-Quads",
            Self::TriG => "TriG",
            Self::RdfXml => "RDF/XML",
        }
    }

    /// Whether the format can carry named graphs.
    pub fn has_graphs(self) -> bool {
        matches!(self, Self::NQuads | Self::TriG)
    }
}

impl std::fmt::Display for RdfFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct SinkError {
    message: String,
}

impl From<ntriples::TermParseError> for SinkError {
    fn from(e: ntriples::TermParseError) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

fn statement_from_display(s: &str, p: &str, o: &str, g: Option<String>) -> std::result::Result<Statement, SinkError> {
    let subject = ntriples::parse_term(s)?;
    let predicate = match ntriples::parse_term(p)? {
        Term::Iri(iri) => iri,
        other => {
            return Err(SinkError {
                message: format!("predicate is not an IRI: {other}"),
            })
        }
    };
    let object = ntriples::parse_term(o)?;
    let statement = Statement::new(subject, predicate, object);
    Ok(match g {
        Some(g) => statement.in_context(ntriples::parse_term(&g)?),
        None => statement,
    })
}

/// Parses `bytes` in the given format.
pub fn parse_bytes(bytes: &[u8], format: RdfFormat) -> Result<Vec<Statement>> {
    let mut out = Vec::new();
    let reader = Cursor::new(bytes);
    let parse_err = |e: &dyn std::fmt::Display| IngestError::Parse {
        format,
        message: e.to_string(),
    };

    match format {
        RdfFormat::NTriples => {
            let mut parser = sophia::turtle::parser::nt::parse_bufread(reader);
            parser
                .try_for_each_triple(|t| -> std::result::Result<(), SinkError> {
                    out.push(statement_from_display(&t.s().to_string(), &t.p().to_string(), &t.o().to_string(), None)?);
                    Ok(())
                })
                .map_err(|e| parse_err(&e))?;
        }
        RdfFormat::Turtle => {
            let mut parser = sophia::turtle::parser::turtle::parse_bufread(reader);
            parser
                .try_for_each_triple(|t| -> std::result::Result<(), SinkError> {
                    out.push(statement_from_display(&t.s().to_string(), &t.p().to_string(), &t.o().to_string(), None)?);
                    Ok(())
                })
                .map_err(|e| parse_err(&e))?;
        }
        RdfFormat::RdfXml => {
            let mut parser = sophia::xml::parser::parse_bufread(reader);
            parser
                .try_for_each_triple(|t| -> std::result::Result<(), SinkError> {
                    out.push(statement_from_display(&t.s().to_string(), &t.p().to_string(), &t.o().to_string(), None)?);
                    Ok(())
                })
                .map_err(|e| parse_err(&e))?;
        }
        RdfFormat::NQuads => {
            let mut parser = sophia::turtle::parser::nq::parse_bufread(reader);
            parser
                .try_for_each_quad(|q| -> std::result::Result<(), SinkError> {
                    out.push(statement_from_display(
                        &q.s().to_string(),
                        &q.p().to_string(),
                        &q.o().to_string(),
                        q.g().map(|g| g.to_string()),
                    )?);
                    Ok(())
                })
                .map_err(|e| parse_err(&e))?;
        }
        RdfFormat::TriG => {
            let mut parser = sophia::turtle::parser::trig::parse_bufread(reader);
            parser
                .try_for_each_quad(|q| -> std::result::Result<(), SinkError> {
                    out.push(statement_from_display(
                        &q.s().to_string(),
                        &q.p().to_string(),
                        &q.o().to_string(),
                        q.g().map(|g| g.to_string()),
                    )?);
                    Ok(())
                })
                .map_err(|e| parse_err(&e))?;
        }
    }

    tracing::debug!(format = %format, statements = out.len(), "parsed RDF");
    Ok(out)
}

pub fn parse_str(text: &str, format: RdfFormat) -> Result<Vec<Statement>> {
    parse_bytes(text.as_bytes(), format)
}

/// Loads a file, picking the parser by extension.
pub fn load_file(path: &Path) -> Result<Vec<Statement>> {
    let format = RdfFormat::from_path(path)?;
    let bytes = fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let statements = parse_bytes(&bytes, format)?;
    tracing::info!(path = %path.display(), format = %format, statements = statements.len(), "loaded RDF file");
    Ok(statements)
}

/// Loads a file and places every statement without a graph of its own into
/// `context`.
pub fn load_file_into(path: &Path, context: &Iri) -> Result<Vec<Statement>> {
    Ok(load_file(path)?
        .into_iter()
        .map(|st| match st.context {
            Some(_) => st,
            None => st.in_context(context.clone()),
        })
        .collect())
}
