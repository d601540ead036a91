//! N-Triples term syntax.
//!
//! Parses the display form of a single term (`<iri>`, `_:b`, `"lex"`,
//! `"lex"@lang`, `"lex"^^<dt>`). Loaders use it to turn parser output into
//! [`Term`]s and the pattern query engine uses it for constants in queries.

use crate::{vocab, Iri, Literal, Term};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TermParseError {
    #[error("empty term")]
    Empty,
    #[error("invalid literal term (missing closing quote): {0}")]
    UnterminatedLiteral(String),
    #[error("invalid literal suffix `{suffix}` in {term}")]
    BadLiteralSuffix { term: String, suffix: String },
    #[error("unsupported RDF term form: {0}")]
    Unsupported(String),
}

pub fn parse_term(text: &str) -> Result<Term, TermParseError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(TermParseError::Empty);
    }

    if let Some(rest) = s.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Term::iri(rest));
    }

    if let Some(rest) = s.strip_prefix("_:") {
        return Ok(Term::blank(rest));
    }

    if s.starts_with('"') {
        return parse_literal(s).map(Term::Literal);
    }

    Err(TermParseError::Unsupported(s.to_string()))
}

fn parse_literal(s: &str) -> Result<Literal, TermParseError> {
    let mut end_quote = None;
    let mut escaped = false;
    for (i, ch) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => {
                end_quote = Some(i);
                break;
            }
            _ => {}
        }
    }
    let Some(end) = end_quote else {
        return Err(TermParseError::UnterminatedLiteral(s.to_string()));
    };

    let lexical = unescape(&s[1..end]);
    let rest = s[end + 1..].trim();

    if rest.is_empty() {
        return Ok(Literal::simple(lexical));
    }
    if let Some(lang) = rest.strip_prefix('@') {
        return Ok(Literal::lang(lexical, lang));
    }
    if let Some(dt) = rest.strip_prefix("^^") {
        let dt = dt.trim();
        let dt = dt
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(dt);
        if dt == vocab::xsd::STRING {
            return Ok(Literal::simple(lexical));
        }
        return Ok(Literal::typed(lexical, Iri::new(dt)));
    }

    Err(TermParseError::BadLiteralSuffix {
        term: s.to_string(),
        suffix: rest.to_string(),
    })
}

pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}
