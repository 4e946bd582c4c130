//! Lexer/Parser: turns template bytes into a tree of IR
//! nodes. Structural tag/body scanning is hand-rolled (`scan`);
//! attribute-list tokenizing is a narrow `pest` grammar (`attrs`).

pub mod attrs;
pub mod scan;

use crate::error::Diagnostic;
use crate::ir::Node;

/// Parses `source` into a root node list plus any diagnostics from
/// bounded recovery.
pub fn parse_nodes(source: &str, eprefix: &str) -> (Vec<Node>, Vec<Diagnostic>) {
    scan::parse(source, eprefix)
}
