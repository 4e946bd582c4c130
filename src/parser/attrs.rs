//! Attribute-list tokenizing: `name=value` / bare-`name`
//! tokens, quoted values with `\"`/`\\` escapes. A narrow `pest` grammar
//! handles just this sub-language while the outer tag scanning stays
//! hand-rolled (see `parser::scan`).

use pest::Parser;
use pest_derive::Parser as PestParser;

use crate::error::{Diagnostic, ErrorKind};

#[derive(PestParser)]
#[grammar = "parser/attrs.pest"]
struct AttrListParser;

/// Tokenizes a raw attribute-list string into ordered `Attr`s. Template
/// sub-parsing of values is deferred to the caller (`scan::parse_attr_value`),
/// which needs the recursive entry point from `scan`.
pub fn tokenize(raw: &str, eprefix: &str) -> Result<Vec<(String, Option<String>)>, Diagnostic> {
    let pairs = AttrListParser::parse(Rule::attr_list, raw).map_err(|e| {
        Diagnostic::new(
            ErrorKind::Parse,
            eprefix,
            format!("malformed attribute list {raw:?}: {e}"),
        )
    })?;

    let mut out = Vec::new();
    for pair in pairs {
        if pair.as_rule() != Rule::attr_list {
            continue;
        }
        for attr in pair.into_inner() {
            if attr.as_rule() != Rule::attr {
                continue;
            }
            let mut inner = attr.into_inner();
            let name = inner.next().expect("attr always has a name").as_str().to_string();
            let value = inner.next().map(|v| unescape_value(v.as_str()));
            out.push((name, value));
        }
    }
    Ok(out)
}

fn unescape_value(raw: &str) -> String {
    if let Some(body) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        raw.to_string()
    }
}

/// A value containing a template sequence is parsed as an inline
/// sub-IR rather than taken literally.
pub fn looks_like_template(value: &str) -> bool {
    value.contains("<:") || value.contains("<=") || value.contains("<#")
}
