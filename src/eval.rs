//! The Evaluator: a depth-first recursive IR walker that
//! produces output, handling scope binding, list expansion, and
//! control-sequence dispatch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{self, GLOBAL_CACHE};
use crate::debug::Tracer;
use crate::error::{dispatch_fragment_error, Dispatch, ErrorList, ErrorPolicy};
use crate::fragment::{self, FragmentContext, FragmentRegistry};
use crate::ir::{Binding, Case, Node, SectionTag, TransformTag, VarScopeAttrs};
use crate::loader::Loader;
use crate::parser;
use crate::value::{Kind, Value};

/// Recursion/include-cycle guard.
const MAX_DEPTH: usize = 200;

/// The mutable frame the evaluator carries through a walk:
/// the current parameter map and the current value.
#[derive(Clone)]
struct Frame {
    params: HashMap<String, Value>,
    current_value: Value,
}

impl Frame {
    fn child_with(&self, bindings: HashMap<String, Value>, inherit: bool) -> Frame {
        let mut params = if inherit {
            self.params.clone()
        } else {
            HashMap::new()
        };
        params.extend(bindings);
        Frame {
            params,
            current_value: self.current_value.clone(),
        }
    }
}

/// Why a render call stopped early.
pub enum Abort {
    /// `onerror=die` fired; `message` is already recorded in the error
    /// list. Partial output must be discarded.
    Died(String),
}

pub type EvalResult = Result<(), Abort>;

pub struct Evaluator<'a> {
    pub registry: &'a FragmentRegistry,
    pub namespace: &'a str,
    pub loader: &'a dyn Loader,
    pub search_path: &'a [PathBuf],
    pub bypass_cache: bool,
    pub error_policy: &'a ErrorPolicy,
    pub eprefix: &'a str,
    pub errors: &'a mut ErrorList,
    pub private_data: &'a Value,
    tracer: &'a Tracer,
    include_stack: Vec<String>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a FragmentRegistry,
        namespace: &'a str,
        loader: &'a dyn Loader,
        search_path: &'a [PathBuf],
        bypass_cache: bool,
        error_policy: &'a ErrorPolicy,
        eprefix: &'a str,
        errors: &'a mut ErrorList,
        private_data: &'a Value,
        tracer: &'a Tracer,
    ) -> Self {
        Evaluator {
            registry,
            namespace,
            loader,
            search_path,
            bypass_cache,
            error_policy,
            eprefix,
            errors,
            private_data,
            tracer,
            include_stack: Vec::new(),
            depth: 0,
        }
    }

    pub fn evaluate_root(
        &mut self,
        nodes: &[Node],
        params: HashMap<String, Value>,
    ) -> Result<String, String> {
        let mut frame = Frame {
            params,
            current_value: Value::None,
        };
        let mut out = String::new();
        match self.render_nodes(nodes, &mut frame, &mut out) {
            Ok(()) => Ok(out),
            Err(Abort::Died(msg)) => Err(msg),
        }
    }

    fn enter(&mut self) -> Result<(), Abort> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let msg = "recursion depth exceeded".to_string();
            self.errors.push(crate::error::Diagnostic::new(
                crate::error::ErrorKind::FragmentRuntime,
                self.eprefix,
                msg.clone(),
            ));
            return Err(Abort::Died(msg));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn render_nodes(&mut self, nodes: &[Node], frame: &mut Frame, out: &mut String) -> EvalResult {
        for node in nodes {
            self.render_node(node, frame, out)?;
        }
        Ok(())
    }

    fn render_to_string(&mut self, nodes: &[Node], frame: &mut Frame) -> Result<String, Abort> {
        let mut s = String::new();
        self.render_nodes(nodes, frame, &mut s)?;
        Ok(s)
    }

    fn render_node(&mut self, node: &Node, frame: &mut Frame, out: &mut String) -> EvalResult {
        self.enter()?;
        if self.tracer.is_enabled() {
            self.tracer.trace_node(node_label(node));
        }
        let result = match node {
            Node::Text(s) => {
                out.push_str(s);
                Ok(())
            }
            Node::Comment => Ok(()),
            Node::Code { fragment, body } => self.render_code(fragment, body, frame, out),
            Node::VarScope { name, attrs, body } => {
                self.render_var_scope(name, attrs, body, frame, out)
            }
            Node::For { bindings, inherit, body } => {
                self.render_for(bindings, *inherit, body, frame, out)
            }
            Node::Eval { bindings, inherit, body } => {
                self.render_eval(bindings, *inherit, body, frame, out)
            }
            Node::Include { name_tokens, bindings, inherit } => {
                self.render_include(name_tokens, bindings, *inherit, frame, out)
            }
            Node::Cond { var_names, cases } => self.render_cond(var_names, cases, frame, out),
            Node::Section { .. } => {
                // A stray Section at evaluator top level is an error
                //; it is not fatal — sections carry
                // no output contract of their own, so emit nothing.
                self.errors.push(crate::error::Diagnostic::new(
                    crate::error::ErrorKind::Parse,
                    self.eprefix,
                    "stray section node at evaluator top level",
                ));
                Ok(())
            }
        };
        self.leave();
        result
    }

    // ---- Code -----------------------------------------------------

    fn render_code(
        &mut self,
        fragment_src: &Arc<str>,
        body: &[Node],
        frame: &mut Frame,
        out: &mut String,
    ) -> EvalResult {
        if fragment_src.is_empty() {
            if body.is_empty() {
                // The bare `<:/>` current-value shorthand.
                frame.current_value.render_into(out);
            } else {
                self.render_nodes(body, frame, out)?;
            }
            return Ok(());
        }

        if !body.is_empty() {
            self.render_nodes(body, frame, out)?;
        }

        match self.invoke_fragment(fragment_src, frame) {
            Ok(value) => {
                value.render_into(out);
                Ok(())
            }
            Err(message) => self.handle_fragment_error(&message, out),
        }
    }

    fn invoke_fragment(&mut self, source: &str, frame: &Frame) -> Result<Value, String> {
        let compiled = fragment::compile_cached(
            self.registry,
            self.namespace,
            source,
            self.bypass_cache,
        )
        .map_err(|e| e.0)?;
        let ctx = FragmentContext {
            current_value: &frame.current_value,
            private_data: self.private_data,
            params: &frame.params,
        };
        fragment::invoke(self.registry, self.namespace, &compiled, &ctx).map_err(|e| e.0)
    }

    fn handle_fragment_error(&mut self, message: &str, out: &mut String) -> EvalResult {
        self.tracer.trace_error(message);
        match dispatch_fragment_error(self.error_policy, self.errors, self.eprefix, message) {
            Dispatch::Substitute(v) => {
                v.render_into(out);
                Ok(())
            }
            Dispatch::Abort => Err(Abort::Died(message.to_string())),
        }
    }

    // ---- VarScope ---------------------------------------------------

    fn render_var_scope(
        &mut self,
        name: &str,
        attrs: &VarScopeAttrs,
        body: &[Node],
        frame: &mut Frame,
        out: &mut String,
    ) -> EvalResult {
        let v = frame.params.get(name).cloned().unwrap_or(Value::None);
        let kind = v.kind();

        if !attrs.type_filter.is_empty() && !attrs.type_filter.contains(&kind) {
            return Ok(());
        }

        let mut xs = v.normalize_to_list();

        // Attribute-form transforms apply first (textual order), then
        // child-section forms, each in body source order regardless of
        // which of grep/map/sort they are.
        for (tag, source) in &attrs.transforms {
            xs = self.apply_transform(*tag, source, &xs, frame)?;
        }
        for section in Node::find_transform_sections(body) {
            let Node::Section { tag, .. } = section else {
                unreachable!("find_transform_sections only returns Section nodes")
            };
            let transform_tag = match tag {
                SectionTag::Grep => TransformTag::Grep,
                SectionTag::Map => TransformTag::Map,
                SectionTag::Sort => TransformTag::Sort,
                _ => unreachable!("find_transform_sections filters to grep/map/sort"),
            };
            xs = self.apply_section_transform(transform_tag, section, &xs, frame)?;
        }

        // Step 3: pre.
        let pre = self.resolve_modifier(body, SectionTag::Pre, &attrs.pre);
        if let Some((template, force)) = &pre {
            if force || !xs.is_empty() {
                self.render_nodes(template, frame, out)?;
            }
        }

        // Step 4: per-element. A self-closing opener (`<=v/>`) and a
        // matched form with no non-section children (`<=v></=v>`) carry
        // the same empty IR body; both default to the bare current-value
        // shorthand rather than rendering nothing.
        let stripped = Node::strip_sections(body);
        let implicit_body: Vec<Node> = if stripped.is_empty() {
            vec![Node::Code { fragment: Arc::from(""), body: Vec::new() }]
        } else {
            stripped
        };
        let first = self.resolve_modifier(body, SectionTag::First, &attrs.first);
        let last = self.resolve_modifier(body, SectionTag::Last, &attrs.last);
        let code = self.resolve_modifier(body, SectionTag::Code, &attrs.code);
        let n = xs.len();
        for (i, elem) in xs.iter().enumerate() {
            let mut elem_frame = frame.clone();
            elem_frame.current_value = elem.clone();
            let template: &[Node] = if i == 0 {
                first.as_ref().map(|(t, _)| t.as_slice())
            } else {
                None
            }
            .or_else(|| {
                if i == n - 1 {
                    last.as_ref().map(|(t, _)| t.as_slice())
                } else {
                    None
                }
            })
            .or_else(|| code.as_ref().map(|(t, _)| t.as_slice()))
            .unwrap_or(&implicit_body);
            self.render_nodes(template, &mut elem_frame, out)?;
        }

        // Step 5: post.
        let post = self.resolve_modifier(body, SectionTag::Post, &attrs.post);
        if let Some((template, force)) = &post {
            if *force || !xs.is_empty() {
                self.render_nodes(template, frame, out)?;
            }
        }

        Ok(())
    }

    /// Resolves a `pre`/`post`/`first`/`last`/`code` modifier: a child
    /// `Section` wins and forces emission, otherwise falls back to the
    /// attribute form (suppressed on empty `xs` for `pre`/`post`).
    fn resolve_modifier(
        &self,
        body: &[Node],
        tag: SectionTag,
        attr: &Option<crate::ir::AttrValue>,
    ) -> Option<(Vec<Node>, bool)> {
        if let Some(Node::Section { body: section_body, .. }) = Node::find_section(body, tag) {
            return Some((section_body.clone(), true));
        }
        attr.as_ref().map(|av| match av {
            crate::ir::AttrValue::Literal(s) => (vec![Node::Text(s.clone())], false),
            crate::ir::AttrValue::Template(nodes) => (nodes.clone(), false),
        })
    }

    fn apply_transform(
        &mut self,
        tag: TransformTag,
        source: &str,
        xs: &[Value],
        frame: &Frame,
    ) -> Result<Vec<Value>, Abort> {
        self.run_transform(tag, source, xs, frame)
    }

    fn apply_section_transform(
        &mut self,
        tag: TransformTag,
        section: &Node,
        xs: &[Value],
        frame: &Frame,
    ) -> Result<Vec<Value>, Abort> {
        let source = match section {
            Node::Section { body, .. } => match body.first() {
                Some(Node::Text(s)) => s.clone(),
                _ => String::new(),
            },
            _ => String::new(),
        };
        self.run_transform(tag, &source, xs, frame)
    }

    fn run_transform(
        &mut self,
        tag: TransformTag,
        source: &str,
        xs: &[Value],
        frame: &Frame,
    ) -> Result<Vec<Value>, Abort> {
        match tag {
            TransformTag::Grep => {
                let mut out = Vec::new();
                for elem in xs {
                    let mut params = frame.params.clone();
                    params.insert("_".to_string(), elem.clone());
                    let sub_frame = Frame { params, current_value: elem.clone() };
                    let keep = match self.invoke_fragment(source, &sub_frame) {
                        Ok(v) => v.truthy(),
                        Err(message) => {
                            let mut sink = String::new();
                            self.handle_fragment_error(&message, &mut sink)?;
                            false
                        }
                    };
                    if keep {
                        out.push(elem.clone());
                    }
                }
                Ok(out)
            }
            TransformTag::Map => {
                let mut out = Vec::with_capacity(xs.len());
                for elem in xs {
                    let mut params = frame.params.clone();
                    params.insert("_".to_string(), elem.clone());
                    let sub_frame = Frame { params, current_value: elem.clone() };
                    match self.invoke_fragment(source, &sub_frame) {
                        Ok(v) => out.push(v),
                        Err(message) => {
                            let mut sink = String::new();
                            self.handle_fragment_error(&message, &mut sink)?;
                            out.push(Value::scalar(sink));
                        }
                    }
                }
                Ok(out)
            }
            TransformTag::Sort => {
                let mut out = xs.to_vec();
                let mut sort_err = None;
                out.sort_by(|a, b| {
                    if sort_err.is_some() {
                        return std::cmp::Ordering::Equal;
                    }
                    let mut params = frame.params.clone();
                    params.insert("a".to_string(), a.clone());
                    params.insert("b".to_string(), b.clone());
                    let sub_frame = Frame { params, current_value: a.clone() };
                    match self.invoke_fragment(source, &sub_frame) {
                        Ok(v) => match v.render().trim().parse::<i64>() {
                            Ok(n) if n < 0 => std::cmp::Ordering::Less,
                            Ok(n) if n > 0 => std::cmp::Ordering::Greater,
                            _ => std::cmp::Ordering::Equal,
                        },
                        Err(message) => {
                            sort_err = Some(message);
                            std::cmp::Ordering::Equal
                        }
                    }
                });
                if let Some(message) = sort_err {
                    let mut sink = String::new();
                    self.handle_fragment_error(&message, &mut sink)?;
                }
                Ok(out)
            }
        }
    }

    // ---- For / Eval bindings -----------------------------------------

    /// Evaluates `bindings` into the Cartesian product of frames: each
    /// List-valued binding expands in declared order, and the
    /// last-declared binding holds its value across a full sweep of
    /// earlier ones before advancing (later-declared varies slowest,
    /// first-declared varies fastest).
    fn expand_bindings(
        &mut self,
        bindings: &[Binding],
        frame: &mut Frame,
    ) -> Result<Vec<HashMap<String, Value>>, Abort> {
        let mut combos: Vec<HashMap<String, Value>> = vec![HashMap::new()];
        for binding in bindings {
            let value = self.evaluate_binding_value(binding, frame)?;
            match value {
                Value::List(items) => {
                    let mut next = Vec::with_capacity(combos.len() * items.len().max(1));
                    for item in &items {
                        for combo in &combos {
                            let mut c = combo.clone();
                            c.insert(binding.name.clone(), item.clone());
                            next.push(c);
                        }
                    }
                    combos = next;
                }
                scalar => {
                    for combo in combos.iter_mut() {
                        combo.insert(binding.name.clone(), scalar.clone());
                    }
                }
            }
        }
        Ok(combos)
    }

    /// A binding rendered from a single `<:/>`-style expression whose
    /// fragment returns a List takes that List directly; otherwise the
    /// rendered text (possibly assembled from multiple substitutions)
    /// is the scalar binding value.
    fn evaluate_binding_value(&mut self, binding: &Binding, frame: &mut Frame) -> Result<Value, Abort> {
        if let [Node::Code { fragment, body }] = binding.value_template.as_slice() {
            if !body.is_empty() {
                return self.render_plain_binding(binding, frame);
            }
            if let Ok(v) = self.invoke_fragment(fragment, frame) {
                return Ok(v);
            }
        }
        self.render_plain_binding(binding, frame)
    }

    fn render_plain_binding(&mut self, binding: &Binding, frame: &mut Frame) -> Result<Value, Abort> {
        let s = self.render_to_string(&binding.value_template, frame)?;
        Ok(Value::scalar(s))
    }

    // ---- For ----------------------------------------------------------

    fn render_for(
        &mut self,
        bindings: &[Binding],
        inherit: bool,
        body: &[Node],
        frame: &mut Frame,
        out: &mut String,
    ) -> EvalResult {
        let combos = self.expand_bindings(bindings, frame)?;
        // "if body_ir contains a <:code> child, only that child is
        // rendered per expansion".
        let render_body: Vec<Node> = match Node::find_section(body, SectionTag::Code) {
            Some(Node::Section { body: code_body, .. }) => code_body.clone(),
            _ => body.to_vec(),
        };
        for combo in combos {
            let mut child = frame.child_with(combo, inherit);
            self.render_nodes(&render_body, &mut child, out)?;
        }
        Ok(())
    }

    // ---- Eval -----------------------------------------------------------

    fn render_eval(
        &mut self,
        bindings: &[Binding],
        inherit: bool,
        body: &[Node],
        frame: &mut Frame,
        out: &mut String,
    ) -> EvalResult {
        let combos = self.expand_bindings(bindings, frame)?;
        for combo in combos {
            let mut child = frame.child_with(combo, inherit);
            let rendered = self.render_to_string(body, &mut child)?;
            // The rendered string is parsed as a fresh template and
            // evaluated with the *enclosing* scope's parameter map, not
            // the binding-augmented one.
            let key = cache::content_hash(rendered.as_bytes());
            let nodes = if self.bypass_cache {
                Arc::new(parser::parse_nodes(&rendered, self.eprefix).0)
            } else {
                let (nodes, hit) = GLOBAL_CACHE.get_or_insert_template(key, || {
                    Arc::new(parser::parse_nodes(&rendered, self.eprefix).0)
                });
                if hit {
                    self.tracer.trace_cache_hit("templates", key);
                } else {
                    self.tracer.trace_cache_miss("templates", key);
                }
                nodes
            };
            self.render_nodes(&nodes, frame, out)?;
        }
        Ok(())
    }

    // ---- Include --------------------------------------------------------

    fn render_include(
        &mut self,
        name_tokens: &[Node],
        bindings: &[Binding],
        inherit: bool,
        frame: &mut Frame,
        out: &mut String,
    ) -> EvalResult {
        let name = self.render_to_string(name_tokens, frame)?;

        if self.include_stack.contains(&name) {
            self.errors.push(crate::error::Diagnostic::new(
                crate::error::ErrorKind::Parse,
                self.eprefix,
                format!("include cycle detected: {name}"),
            ));
            return Ok(());
        }

        let bytes = match self.loader.resolve(&name, self.search_path) {
            Ok(b) => b,
            Err(e) => {
                self.errors.push(crate::error::Diagnostic::new(
                    crate::error::ErrorKind::Load,
                    self.eprefix,
                    format!("{e}"),
                ));
                return Ok(());
            }
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let key = cache::content_hash(text.as_bytes());
        let nodes = if self.bypass_cache {
            Arc::new(parser::parse_nodes(&text, self.eprefix).0)
        } else {
            let (nodes, hit) = GLOBAL_CACHE.get_or_insert_template(key, || {
                Arc::new(parser::parse_nodes(&text, self.eprefix).0)
            });
            if hit {
                self.tracer.trace_cache_hit("templates", key);
            } else {
                self.tracer.trace_cache_miss("templates", key);
            }
            nodes
        };

        let combos = self.expand_bindings(bindings, frame)?;
        let combo = combos.into_iter().next().unwrap_or_default();
        let mut child = frame.child_with(combo, inherit);

        self.include_stack.push(name);
        let result = self.render_nodes(&nodes, &mut child, out);
        self.include_stack.pop();
        result
    }

    // ---- Cond -------------------------------------------------------------

    fn render_cond(
        &mut self,
        var_names: &[String],
        cases: &[Case],
        frame: &mut Frame,
        out: &mut String,
    ) -> EvalResult {
        for case in cases {
            let mut params = frame.params.clone();
            for name in var_names {
                if let Some(v) = frame.params.get(name) {
                    params.insert(name.clone(), v.clone());
                }
            }
            let cond_frame = Frame { params, current_value: frame.current_value.clone() };
            let truthy = match self.invoke_fragment(&case.condition, &cond_frame) {
                Ok(v) => v.truthy(),
                Err(message) => {
                    self.handle_fragment_error(&message, &mut String::new())?;
                    false
                }
            };
            if truthy {
                self.render_nodes(&case.body, frame, out)?;
                return Ok(());
            }
        }
        Ok(())
    }
}

pub fn classify(v: &Value) -> Kind {
    v.kind()
}

fn node_label(node: &Node) -> &'static str {
    match node {
        Node::Text(_) => "text",
        Node::Comment => "comment",
        Node::Code { .. } => "code",
        Node::VarScope { .. } => "var-scope",
        Node::For { .. } => "for",
        Node::Eval { .. } => "eval",
        Node::Include { .. } => "include",
        Node::Cond { .. } => "cond",
        Node::Section { .. } => "section",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorList;
    use crate::loader::{FsLoader, Loader as _};

    fn run(src: &str, params: HashMap<String, Value>) -> String {
        let (nodes, diags) = parser::parse_nodes(src, "[T]");
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        let registry = FragmentRegistry::new();
        let loader = FsLoader;
        let search_path = Vec::new();
        let policy = ErrorPolicy::Die;
        let mut errors = ErrorList::new();
        let private = Value::None;
        let tracer = Tracer::new(false);
        let mut evaluator = Evaluator::new(
            &registry, "expr", &loader, &search_path, true, &policy, "[T]", &mut errors, &private,
            &tracer,
        );
        evaluator.evaluate_root(&nodes, params).unwrap()
    }

    #[test]
    fn scenario_1_simple_varscope() {
        let mut params = HashMap::new();
        params.insert("v".to_string(), Value::scalar("X"));
        assert_eq!(run("pre<=v/>post", params), "preXpost");
    }

    #[test]
    fn scenario_2_list_with_bare_code() {
        let mut params = HashMap::new();
        params.insert(
            "xs".to_string(),
            Value::list(vec![Value::scalar("a"), Value::scalar("b"), Value::scalar("c")]),
        );
        assert_eq!(run("<=xs><:/>,</=xs>", params), "a,b,c,");
    }

    #[test]
    fn scenario_3_first_last_code() {
        let mut params = HashMap::new();
        params.insert(
            "xs".to_string(),
            Value::list(vec![
                Value::scalar("a"),
                Value::scalar("b"),
                Value::scalar("c"),
                Value::scalar("d"),
            ]),
        );
        let tpl = r#"<=xs first="[<:/>]" last="(<:/>)" code="<<:/>>"/>"#;
        assert_eq!(run(tpl, params), "[a]<b><c>(d)");
    }

    #[test]
    fn scenario_4_cartesian_product() {
        // `x` is declared last, so it holds its value across a full
        // sweep of `y` before advancing (last-declared varies slowest).
        let tpl = "<:for y=\"<:[1,2,3]/>\" x=\"<:[10,20]/>\"><:code><=x/>-<=y/>;</:code></:for>";
        assert_eq!(
            run(tpl, HashMap::new()),
            "10-1;10-2;10-3;20-1;20-2;20-3;"
        );
    }

    #[test]
    fn variable_not_supplied_classifies_empty() {
        assert_eq!(run("<=missing type=empty>gone</=missing>", HashMap::new()), "gone");
    }

    #[test]
    fn cond_with_no_matching_case_emits_nothing() {
        assert_eq!(
            run("<:cond><:case 0>A</:case></:cond>", HashMap::new()),
            ""
        );
    }

    #[test]
    fn literal_only_template_is_identity() {
        assert_eq!(run("just plain text, no sigils here", HashMap::new()), "just plain text, no sigils here");
    }
}
