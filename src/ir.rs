//! The intermediate representation tree produced by
//! the parser and walked by the evaluator.

use std::sync::Arc;

/// An attribute's value: either plain text, or — when the text contained
/// a template sequence — a parsed sub-IR that renders to a string when
/// bound. Raw `name=value` /
/// bare-`name` tokenizing happens in `parser::attrs`; by the time an IR
/// node is built, each attribute has already been classified into one of
/// these two forms or folded into a `Binding`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Literal(String),
    Template(Vec<Node>),
}

/// The `:inherit` / `:inheritparms` reserved keyword.
pub fn is_inherit_keyword(name: &str) -> bool {
    name == ":inherit" || name == ":inheritparms"
}

/// A `name=value` binding attached to `for`/`eval`/`include`,
/// or contributed by a `<:set>` child.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value_template: Vec<Node>,
}

/// The structural tag carried by a `Section` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionTag {
    Code,
    Pre,
    Post,
    First,
    Last,
    Map,
    Grep,
    Sort,
    Set,
}

impl SectionTag {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "code" => SectionTag::Code,
            "pre" => SectionTag::Pre,
            "post" => SectionTag::Post,
            "first" => SectionTag::First,
            "last" => SectionTag::Last,
            "map" => SectionTag::Map,
            "grep" => SectionTag::Grep,
            "sort" => SectionTag::Sort,
            "set" => SectionTag::Set,
            _ => return None,
        })
    }
}

/// One `<:case cond>body</:case>` arm of a `Cond`.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub condition: String,
    pub body: Vec<Node>,
}

/// One of the three list-transform modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformTag {
    Grep,
    Map,
    Sort,
}

/// The attribute-derived modifiers of a `VarScope`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarScopeAttrs {
    pub type_filter: Vec<crate::value::Kind>,
    pub code: Option<AttrValue>,
    pub pre: Option<AttrValue>,
    pub post: Option<AttrValue>,
    pub first: Option<AttrValue>,
    pub last: Option<AttrValue>,
    /// `grep`/`map`/`sort` attributes, in the textual left-to-right
    /// order they were written at the opener.
    pub transforms: Vec<(TransformTag, String)>,
}

/// A node of the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Comment,
    /// `<:…/>` or `<:…>body</:>`. `fragment` is the raw fragment source
    /// (empty string for the bare `<:/>` current-value shorthand).
    Code {
        fragment: Arc<str>,
        body: Vec<Node>,
    },
    VarScope {
        name: String,
        attrs: VarScopeAttrs,
        body: Vec<Node>,
    },
    For {
        bindings: Vec<Binding>,
        inherit: bool,
        body: Vec<Node>,
    },
    Eval {
        bindings: Vec<Binding>,
        inherit: bool,
        body: Vec<Node>,
    },
    Include {
        name_tokens: Vec<Node>,
        bindings: Vec<Binding>,
        inherit: bool,
    },
    Cond {
        var_names: Vec<String>,
        cases: Vec<Case>,
    },
    Section {
        tag: SectionTag,
        /// Present only for `Set`.
        target: Option<String>,
        body: Vec<Node>,
    },
}

impl Node {
    /// The non-section children of a scope body: the part of `body_ir`
    /// used as the implicit per-element template.
    pub fn strip_sections(body: &[Node]) -> Vec<Node> {
        body.iter()
            .filter(|n| !matches!(n, Node::Section { .. }))
            .cloned()
            .collect()
    }

    pub fn find_section(body: &[Node], tag: SectionTag) -> Option<&Node> {
        body.iter()
            .find(|n| matches!(n, Node::Section { tag: t, .. } if *t == tag))
    }

    /// `<:grep>`/`<:map>`/`<:sort>` child sections in body source order,
    /// regardless of which of the three tags each one carries.
    pub fn find_transform_sections(body: &[Node]) -> Vec<&Node> {
        body.iter()
            .filter(|n| {
                matches!(
                    n,
                    Node::Section {
                        tag: SectionTag::Grep | SectionTag::Map | SectionTag::Sort,
                        ..
                    }
                )
            })
            .collect()
    }
}
