//! Processor façade: the one type an embedder constructs and
//! calls `evaluate()`/`evaluate_to_sink()` on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{self, GLOBAL_CACHE};
use crate::debug::Tracer;
use crate::error::{Diagnostic, ErrorList, ErrorPolicy};
use crate::eval::Evaluator;
use crate::fragment::FragmentRegistry;
use crate::ir::Node;
use crate::loader::{FsLoader, Loader};
use crate::parser;
use crate::value::Value;

/// Where a processor's template source comes from at construction time
///.
pub enum TemplateSource {
    Inline(String),
    File(PathBuf),
}

/// Construction-time configuration.
pub struct ProcessorConfig {
    pub source: TemplateSource,
    pub namespace: String,
    pub registry: FragmentRegistry,
    pub loader: Arc<dyn Loader>,
    pub search_path: Vec<PathBuf>,
    pub error_policy: ErrorPolicy,
    pub eprefix: String,
    pub bypass_cache: bool,
    /// Gates the `Tracer`'s `eprintln!` activity trace. Off by default; the CLI exposes it as `--debug`.
    pub debug: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            source: TemplateSource::Inline(String::new()),
            namespace: "expr".to_string(),
            registry: FragmentRegistry::new(),
            loader: Arc::new(FsLoader),
            search_path: FsLoader::search_path_from_env(),
            error_policy: ErrorPolicy::Warn,
            eprefix: String::new(),
            bypass_cache: false,
            debug: false,
        }
    }
}

/// Where `evaluate_to_sink` writes its output.
pub enum Sink<'a> {
    String(&'a mut String),
    Writer(&'a mut dyn std::io::Write),
}

/// The one type an embedder constructs and drives.
pub struct Processor {
    nodes: Arc<Vec<Node>>,
    namespace: String,
    registry: FragmentRegistry,
    loader: Arc<dyn Loader>,
    search_path: Vec<PathBuf>,
    error_policy: ErrorPolicy,
    eprefix: String,
    bypass_cache: bool,
    errors: ErrorList,
    tracer: Tracer,
    error_cursor: usize,
}

impl Processor {
    /// Reads/parses the configured source once at construction time; a
    /// file-read failure here is surfaced as a `Result::Err`, not queued
    /// as a diagnostic, since there is no evaluation to attach it to yet
    ///.
    pub fn new(config: ProcessorConfig) -> Result<Self, String> {
        let text = match config.source {
            TemplateSource::Inline(s) => s,
            TemplateSource::File(path) => std::fs::read_to_string(&path)
                .map_err(|e| format!("{}: {e}", path.display()))?,
        };
        let tracer = Tracer::new(config.debug);
        tracer.trace_parse(&text);
        let (nodes, diagnostics) = parser::parse_nodes(&text, &config.eprefix);
        let mut errors = ErrorList::new();
        for d in diagnostics {
            errors.push(d);
        }
        let nodes = Arc::new(nodes);
        if !config.bypass_cache {
            let key = cache::content_hash(text.as_bytes());
            let (_, hit) = GLOBAL_CACHE.get_or_insert_template(key, || nodes.clone());
            if hit {
                tracer.trace_cache_hit("templates", key);
            } else {
                tracer.trace_cache_miss("templates", key);
            }
        }
        Ok(Processor {
            nodes,
            namespace: config.namespace,
            registry: config.registry,
            loader: config.loader,
            search_path: config.search_path,
            error_policy: config.error_policy,
            eprefix: config.eprefix,
            bypass_cache: config.bypass_cache,
            errors,
            tracer,
            error_cursor: 0,
        })
    }

    /// Evaluates the template against `params` and `private_data`,
    /// returning the rendered string.
    pub fn evaluate(
        &mut self,
        params: HashMap<String, Value>,
        private_data: &Value,
    ) -> Result<String, String> {
        self.error_cursor = self.errors.cursor();
        let mut evaluator = Evaluator::new(
            &self.registry,
            &self.namespace,
            self.loader.as_ref(),
            &self.search_path,
            self.bypass_cache,
            &self.error_policy,
            &self.eprefix,
            &mut self.errors,
            private_data,
            &self.tracer,
        );
        evaluator.evaluate_root(&self.nodes, params)
    }

    /// As `evaluate`, but writes directly into `sink` instead of
    /// allocating a fresh `String`.
    pub fn evaluate_to_sink(
        &mut self,
        params: HashMap<String, Value>,
        private_data: &Value,
        sink: Sink,
    ) -> Result<(), String> {
        self.error_cursor = self.errors.cursor();
        let rendered = self.evaluate(params, private_data)?;
        match sink {
            Sink::String(s) => {
                s.push_str(&rendered);
                Ok(())
            }
            Sink::Writer(w) => {
                w.write_all(rendered.as_bytes())
                    .map_err(|e| format!("sink write failed: {e}"))?;
                Ok(())
            }
        }
    }

    /// Drains and returns diagnostics recorded since the cursor captured
    /// at the start of the most recent `evaluate`/`evaluate_to_sink`
    /// call — construction-time diagnostics and earlier calls' errors
    /// are left untouched.
    pub fn clear_errors(&mut self) -> Vec<Diagnostic> {
        self.errors.clear_before(self.error_cursor)
    }

    pub fn errors(&self) -> &[Diagnostic] {
        self.errors.all()
    }
}
