//! The hand-rolled structural tag scanner. Pest's grammar can't match a
//! dynamic closing identifier (`</=NAME>` must equal the opener's
//! `NAME`) without predicates that would obscure the bounded-recovery
//! discipline this needs, so the scanner walks the source by hand and
//! defers only attribute-list tokenizing to pest (`parser::attrs`).

use std::sync::Arc;

use crate::error::{Diagnostic, ErrorKind};
use crate::ir::{AttrValue, Binding, Case, Node, SectionTag, VarScopeAttrs};
use crate::parser::attrs;
use crate::value::Kind;

const STRUCTURAL_KEYWORDS: &[&str] = &[
    "for", "eval", "include", "cond", "case", "code", "pre", "post", "first", "last", "map",
    "grep", "sort", "set",
];

#[derive(Debug, Clone, Copy)]
enum Marker {
    VarScope,
    Control,
    Comment,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClosedTag {
    VarScope(String),
    Control(Option<String>),
    Comment,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stop {
    VarScope(String),
    Control(Option<String>),
}

impl Stop {
    fn matches(&self, closed: &ClosedTag) -> bool {
        match (self, closed) {
            (Stop::VarScope(a), ClosedTag::VarScope(b)) => a == b,
            (Stop::Control(a), ClosedTag::Control(b)) => a == b,
            _ => false,
        }
    }
}

/// Parses `source` into a root node list plus any diagnostics emitted
/// during bounded recovery.
pub fn parse(source: &str, eprefix: &str) -> (Vec<Node>, Vec<Diagnostic>) {
    let mut s = Scanner {
        chars: source.chars().collect(),
        pos: 0,
        eprefix: eprefix.to_string(),
        diags: Vec::new(),
    };
    let nodes = s.parse_until(None);
    (nodes, s.diags)
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    eprefix: String,
    diags: Vec<Diagnostic>,
}

impl Scanner {
    fn slice(&self, from: usize, to: usize) -> String {
        self.chars[from..to].iter().collect()
    }

    fn err(&mut self, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::new(ErrorKind::Parse, &self.eprefix, message));
    }

    fn find_marker_from(&self, from: usize) -> Option<(usize, Marker)> {
        let mut i = from;
        while i < self.chars.len() {
            if self.chars[i] == '<' {
                if let Some(&c) = self.chars.get(i + 1) {
                    let marker = match c {
                        '=' => Some(Marker::VarScope),
                        ':' => Some(Marker::Control),
                        '#' => Some(Marker::Comment),
                        '/' => Some(Marker::Close),
                        _ => None,
                    };
                    if let Some(m) = marker {
                        return Some((i, m));
                    }
                }
            }
            i += 1;
        }
        None
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.chars.get(self.pos), Some(c) if c.is_alphanumeric() || *c == '_') {
            self.pos += 1;
        }
        self.slice(start, self.pos)
    }

    /// Scans from `self.pos` to the tag-terminating unescaped `>`,
    /// tracking quotes so a literal `>` inside a quoted attribute value
    /// doesn't end the tag early. Returns the raw inner
    /// text (trailing `/` stripped when self-closing), whether the tag
    /// was self-closing, and the position right after `>`. `None` means
    /// the tag was never terminated before EOF.
    fn read_tag_raw(&mut self) -> Option<(String, bool, usize)> {
        let start = self.pos;
        let mut in_quote = false;
        let mut i = self.pos;
        while i < self.chars.len() {
            let c = self.chars[i];
            if in_quote {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == '"' {
                    in_quote = false;
                }
                i += 1;
                continue;
            }
            match c {
                '"' => {
                    in_quote = true;
                    i += 1;
                }
                '>' => {
                    let mut raw: Vec<char> = self.chars[start..i].to_vec();
                    let mut self_close = false;
                    if let Some(&last) = raw.last() {
                        if last == '/' {
                            self_close = true;
                            raw.pop();
                        }
                    }
                    self.pos = i + 1;
                    return Some((raw.into_iter().collect(), self_close, self.pos));
                }
                _ => i += 1,
            }
        }
        None
    }

    /// Parses a `</...>` closer generically: `</=NAME>`, `</:NAME>`,
    /// `</:>`, or `</#>`. Returns the parsed closer and the position
    /// right after `>`; a malformed closer still advances `self.pos` to
    /// guarantee forward progress.
    fn parse_closer(&mut self) -> (ClosedTag, usize) {
        let start = self.pos;
        self.pos += 2; // "</"
        match self.chars.get(self.pos) {
            Some('=') => {
                self.pos += 1;
                let name = self.read_ident();
                match self.chars.get(self.pos) {
                    Some('>') => {
                        self.pos += 1;
                        (ClosedTag::VarScope(name), self.pos)
                    }
                    _ => self.malformed_closer(start),
                }
            }
            Some(':') => {
                self.pos += 1;
                let name = self.read_ident();
                match self.chars.get(self.pos) {
                    Some('>') => {
                        self.pos += 1;
                        let name = if name.is_empty() { None } else { Some(name) };
                        (ClosedTag::Control(name), self.pos)
                    }
                    _ => self.malformed_closer(start),
                }
            }
            Some('#') => {
                self.pos += 1;
                match self.chars.get(self.pos) {
                    Some('>') => {
                        self.pos += 1;
                        (ClosedTag::Comment, self.pos)
                    }
                    _ => self.malformed_closer(start),
                }
            }
            _ => self.malformed_closer(start),
        }
    }

    fn malformed_closer(&mut self, start: usize) -> (ClosedTag, usize) {
        self.err(format!(
            "malformed closing tag near {:?}",
            self.slice(start, (start + 12).min(self.chars.len()))
        ));
        // Advance past "</" only, so the outer loop keeps making progress
        // without swallowing unrelated trailing content.
        self.pos = (start + 2).max(self.pos);
        (ClosedTag::Malformed, self.pos)
    }

    /// Parses the body of a scope up to (and consuming) the matching
    /// `stop` closer, or to EOF with a diagnostic if unmatched. Stray or
    /// mismatched closers are degraded to literal text and recovery
    /// continues, per the bounded-recovery discipline.
    fn parse_until(&mut self, stop: Option<Stop>) -> Vec<Node> {
        let mut nodes = Vec::new();
        let mut text_start = self.pos;
        loop {
            match self.find_marker_from(self.pos) {
                None => {
                    if text_start < self.chars.len() {
                        nodes.push(Node::Text(self.slice(text_start, self.chars.len())));
                    }
                    self.pos = self.chars.len();
                    if let Some(stop) = &stop {
                        self.err(format!("unterminated tag, expected {:?}", stop));
                    }
                    break;
                }
                Some((idx, marker)) => {
                    if idx > text_start {
                        nodes.push(Node::Text(self.slice(text_start, idx)));
                    }
                    self.pos = idx;
                    match marker {
                        Marker::Close => {
                            let (closed, after) = self.parse_closer();
                            let matched = stop.as_ref().map(|s| s.matches(&closed)).unwrap_or(false);
                            if matched {
                                self.pos = after;
                                return nodes;
                            }
                            if !matches!(closed, ClosedTag::Malformed) {
                                self.err(format!("unmatched closing tag {:?}", closed));
                            }
                            nodes.push(Node::Text(self.slice(idx, after)));
                            self.pos = after;
                            text_start = self.pos;
                        }
                        Marker::VarScope => {
                            nodes.push(self.parse_var_scope());
                            text_start = self.pos;
                        }
                        Marker::Control => {
                            nodes.push(self.parse_control());
                            text_start = self.pos;
                        }
                        Marker::Comment => {
                            nodes.push(self.parse_comment());
                            text_start = self.pos;
                        }
                    }
                }
            }
        }
        nodes
    }

    fn parse_comment(&mut self) -> Node {
        let start = self.pos;
        self.pos += 2; // "<#"
        match self.read_tag_raw() {
            Some((_raw, self_close, _end)) => {
                if self_close {
                    return Node::Comment;
                }
                // Matched form: comments don't recurse, scan literally
                // for the closing "</#>".
                let needle = ['<', '/', '#', '>'];
                let mut i = self.pos;
                while i + 4 <= self.chars.len() {
                    if self.chars[i..i + 4] == needle {
                        self.pos = i + 4;
                        return Node::Comment;
                    }
                    i += 1;
                }
                self.err("unterminated comment");
                self.pos = self.chars.len();
                Node::Comment
            }
            None => {
                self.err("unterminated comment opener");
                self.pos = self.chars.len();
                Node::Text(self.slice(start, self.chars.len()))
            }
        }
    }

    /// Scans literally (no nested-tag recursion) up to `</:NAME>`,
    /// returning the text before it and consuming through the closer.
    /// Used for `map`/`grep`/`sort` section bodies, which hold raw
    /// fragment source rather than template IR.
    fn scan_raw_until_close(&mut self, name: &str) -> String {
        let start = self.pos;
        let needle: Vec<char> = format!("</:{name}>").chars().collect();
        let mut i = self.pos;
        while i + needle.len() <= self.chars.len() {
            if self.chars[i..i + needle.len()] == needle[..] {
                let text = self.slice(start, i);
                self.pos = i + needle.len();
                return text;
            }
            i += 1;
        }
        self.err(format!("unterminated <:{name}>"));
        let text = self.slice(start, self.chars.len());
        self.pos = self.chars.len();
        text
    }

    fn parse_var_scope(&mut self) -> Node {
        let start = self.pos;
        self.pos += 2; // "<="
        let name = self.read_ident();
        if name.is_empty() {
            self.err("variable scope missing a name");
            // Recover by treating the opener as literal text up to '>'.
            if let Some((_, _, end)) = self.read_tag_raw() {
                return Node::Text(self.slice(start, end));
            }
            self.pos = self.chars.len();
            return Node::Text(self.slice(start, self.chars.len()));
        }
        let Some((raw, self_close, end)) = self.read_tag_raw() else {
            self.err(format!("unterminated <=${name}> opener"));
            self.pos = self.chars.len();
            return Node::Text(self.slice(start, self.chars.len()));
        };
        self.pos = end;
        let tokens = match attrs::tokenize(&raw, &self.eprefix) {
            Ok(t) => t,
            Err(d) => {
                self.diags.push(d);
                Vec::new()
            }
        };
        let vattrs = self.build_varscope_attrs(tokens);
        let body = if self_close {
            Vec::new()
        } else {
            self.parse_until(Some(Stop::VarScope(name.clone())))
        };
        Node::VarScope {
            name,
            attrs: vattrs,
            body,
        }
    }

    fn build_varscope_attrs(&mut self, tokens: Vec<(String, Option<String>)>) -> VarScopeAttrs {
        let mut out = VarScopeAttrs::default();
        for (name, value) in tokens {
            match name.as_str() {
                "type" => {
                    if let Some(v) = value {
                        out.type_filter = Kind::parse_set(&v);
                    }
                }
                "code" => out.code = value.map(|v| self.value_to_attrvalue(&v)),
                "pre" => out.pre = value.map(|v| self.value_to_attrvalue(&v)),
                "post" => out.post = value.map(|v| self.value_to_attrvalue(&v)),
                "first" => out.first = value.map(|v| self.value_to_attrvalue(&v)),
                "last" => out.last = value.map(|v| self.value_to_attrvalue(&v)),
                "grep" => {
                    if let Some(v) = value {
                        out.transforms.push((crate::ir::TransformTag::Grep, v));
                    }
                }
                "map" => {
                    if let Some(v) = value {
                        out.transforms.push((crate::ir::TransformTag::Map, v));
                    }
                }
                "sort" => {
                    if let Some(v) = value {
                        out.transforms.push((crate::ir::TransformTag::Sort, v));
                    }
                }
                _ => { /* unrecognized attribute: ignored, not an error */ }
            }
        }
        out
    }

    fn parse_control(&mut self) -> Node {
        let start = self.pos;
        self.pos += 2; // "<:"
        let name = self.read_ident();
        let Some((raw, self_close, end)) = self.read_tag_raw() else {
            self.err("unterminated <: opener");
            self.pos = self.chars.len();
            return Node::Text(self.slice(start, self.chars.len()));
        };
        self.pos = end;

        if !STRUCTURAL_KEYWORDS.contains(&name.as_str()) {
            let fragment_text = format!("{name}{raw}").trim().to_string();
            let body = if self_close {
                Vec::new()
            } else {
                self.parse_until(Some(Stop::Control(None)))
            };
            return Node::Code {
                fragment: Arc::from(fragment_text.as_str()),
                body,
            };
        }

        match name.as_str() {
            "for" | "eval" => {
                let tokens = attrs::tokenize(&raw, &self.eprefix).unwrap_or_default();
                let (bindings, inherit) = self.build_bindings(tokens);
                let body = if self_close {
                    Vec::new()
                } else {
                    self.parse_until(Some(Stop::Control(Some(name.clone()))))
                };
                if name == "for" {
                    Node::For { bindings, inherit, body }
                } else {
                    Node::Eval { bindings, inherit, body }
                }
            }
            "include" => {
                let tokens = attrs::tokenize(&raw, &self.eprefix).unwrap_or_default();
                let mut inherit = false;
                let mut name_tokens = Vec::new();
                let mut bindings = Vec::new();
                let mut found_name = false;
                for (tname, tvalue) in tokens {
                    if crate::ir::is_inherit_keyword(&tname) {
                        inherit = true;
                    } else if tvalue.is_none() && !found_name {
                        name_tokens = self.value_to_nodes(&tname);
                        found_name = true;
                    } else if let Some(v) = tvalue {
                        bindings.push(Binding {
                            name: tname,
                            value_template: self.value_to_nodes(&v),
                        });
                    }
                }
                let body = if self_close {
                    Vec::new()
                } else {
                    self.parse_until(Some(Stop::Control(Some("include".to_string()))))
                };
                for node in &body {
                    if let Node::Section {
                        tag: SectionTag::Set,
                        target: Some(target),
                        body: set_body,
                    } = node
                    {
                        bindings.push(Binding {
                            name: target.clone(),
                            value_template: set_body.clone(),
                        });
                    }
                }
                if inherit {
                    inherit = true;
                }
                Node::Include { name_tokens, bindings, inherit }
            }
            "cond" => {
                let tokens = attrs::tokenize(&raw, &self.eprefix).unwrap_or_default();
                let var_names = tokens
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(n, _)| n)
                    .collect();
                let cases = if self_close {
                    Vec::new()
                } else {
                    self.parse_cond_body()
                };
                Node::Cond { var_names, cases }
            }
            "case" => {
                // A `<:case>` reached outside of `<:cond>` dispatch: not
                // structurally valid, but bounded recovery still needs a
                // node, so degrade to its rendered body with no gating.
                self.err("<:case> outside of <:cond>");
                let body = if self_close {
                    Vec::new()
                } else {
                    self.parse_until(Some(Stop::Control(Some("case".to_string()))))
                };
                Node::Section { tag: SectionTag::Code, target: None, body }
            }
            "set" => {
                let tokens = attrs::tokenize(&raw, &self.eprefix).unwrap_or_default();
                let target = tokens.into_iter().find(|(_, v)| v.is_none()).map(|(n, _)| n);
                let body = if self_close {
                    Vec::new()
                } else {
                    self.parse_until(Some(Stop::Control(Some("set".to_string()))))
                };
                Node::Section { tag: SectionTag::Set, target, body }
            }
            "map" | "grep" | "sort" => {
                let tag = SectionTag::parse(&name).expect("validated against STRUCTURAL_KEYWORDS");
                // Content is raw fragment source (a comparator/predicate/
                // transform expression), not nested template IR — scanned
                // literally like a bare Code fragment, not recursed.
                let source = if self_close {
                    String::new()
                } else {
                    self.scan_raw_until_close(&name)
                };
                Node::Section { tag, target: None, body: vec![Node::Text(source)] }
            }
            other => {
                let tag = SectionTag::parse(other).expect("validated against STRUCTURAL_KEYWORDS");
                let body = if self_close {
                    Vec::new()
                } else {
                    self.parse_until(Some(Stop::Control(Some(other.to_string()))))
                };
                Node::Section { tag, target: None, body }
            }
        }
    }

    /// Scans `<:case cond>body</:case>` children up to the matching
    /// `</:cond>` closer. Non-`case` content between cases is tolerated
    /// and skipped rather than erroring, since it carries no meaning.
    fn parse_cond_body(&mut self) -> Vec<Case> {
        let mut cases = Vec::new();
        loop {
            match self.find_marker_from(self.pos) {
                None => {
                    self.err("unterminated <:cond>");
                    self.pos = self.chars.len();
                    break;
                }
                Some((idx, marker)) => {
                    self.pos = idx;
                    match marker {
                        Marker::Close => {
                            let (closed, after) = self.parse_closer();
                            self.pos = after;
                            if closed == ClosedTag::Control(Some("cond".to_string())) {
                                break;
                            }
                        }
                        Marker::Control => {
                            let save = self.pos;
                            self.pos += 2;
                            let name = self.read_ident();
                            if name == "case" {
                                match self.read_tag_raw() {
                                    Some((raw, self_close, end)) => {
                                        self.pos = end;
                                        let condition = raw.trim().to_string();
                                        let body = if self_close {
                                            Vec::new()
                                        } else {
                                            self.parse_until(Some(Stop::Control(Some(
                                                "case".to_string(),
                                            ))))
                                        };
                                        cases.push(Case { condition, body });
                                    }
                                    None => {
                                        self.err("unterminated <:case>");
                                        self.pos = self.chars.len();
                                    }
                                }
                            } else {
                                self.pos = save;
                                self.parse_control();
                            }
                        }
                        Marker::VarScope => {
                            self.parse_var_scope();
                        }
                        Marker::Comment => {
                            self.parse_comment();
                        }
                    }
                }
            }
        }
        cases
    }

    fn build_bindings(&mut self, tokens: Vec<(String, Option<String>)>) -> (Vec<Binding>, bool) {
        let mut bindings = Vec::new();
        let mut inherit = false;
        for (name, value) in tokens {
            if crate::ir::is_inherit_keyword(&name) {
                inherit = true;
                continue;
            }
            if let Some(v) = value {
                bindings.push(Binding {
                    name,
                    value_template: self.value_to_nodes(&v),
                });
            }
        }
        (bindings, inherit)
    }

    /// Recursively parses `text` as a fresh sub-template, folding any
    /// diagnostics into the parent scanner's list.
    fn parse_nested(&mut self, text: &str) -> Vec<Node> {
        let mut sub = Scanner {
            chars: text.chars().collect(),
            pos: 0,
            eprefix: self.eprefix.clone(),
            diags: Vec::new(),
        };
        let nodes = sub.parse_until(None);
        self.diags.extend(sub.diags);
        nodes
    }

    fn value_to_nodes(&mut self, value: &str) -> Vec<Node> {
        if attrs::looks_like_template(value) {
            self.parse_nested(value)
        } else {
            vec![Node::Text(value.to_string())]
        }
    }

    fn value_to_attrvalue(&mut self, value: &str) -> AttrValue {
        if attrs::looks_like_template(value) {
            AttrValue::Template(self.parse_nested(value))
        } else {
            AttrValue::Literal(value.to_string())
        }
    }
}
