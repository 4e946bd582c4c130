use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tagweave::{
    Diagnostic, ErrorPolicy, FragmentRegistry, FsLoader, Processor, ProcessorConfig, Sink,
    TemplateSource, Value,
};

pub fn render(template: &str, params: HashMap<String, Value>) -> Result<String, String> {
    render_with_policy(template, params, ErrorPolicy::Warn)
}

pub fn render_with_policy(
    template: &str,
    params: HashMap<String, Value>,
    error_policy: ErrorPolicy,
) -> Result<String, String> {
    let config = ProcessorConfig {
        source: TemplateSource::Inline(template.to_string()),
        namespace: "expr".to_string(),
        registry: FragmentRegistry::new(),
        loader: Arc::new(FsLoader),
        search_path: Vec::new(),
        error_policy,
        eprefix: "[tagweave] ".to_string(),
        bypass_cache: true,
        debug: false,
    };
    let mut processor = Processor::new(config)?;
    processor.evaluate(params, &Value::None)
}

/// As `render`, but resolves `<:include>` against `search_path`.
pub fn render_with_search_path(
    template: &str,
    params: HashMap<String, Value>,
    search_path: Vec<PathBuf>,
) -> Result<String, String> {
    let config = ProcessorConfig {
        source: TemplateSource::Inline(template.to_string()),
        namespace: "expr".to_string(),
        registry: FragmentRegistry::new(),
        loader: Arc::new(FsLoader),
        search_path,
        error_policy: ErrorPolicy::Warn,
        eprefix: "[tagweave] ".to_string(),
        bypass_cache: true,
        debug: false,
    };
    let mut processor = Processor::new(config)?;
    processor.evaluate(params, &Value::None)
}

/// Renders and returns the diagnostics recorded during that one
/// evaluation.
pub fn render_collecting_errors(
    template: &str,
    params: HashMap<String, Value>,
    error_policy: ErrorPolicy,
) -> (Result<String, String>, Vec<Diagnostic>) {
    let config = ProcessorConfig {
        source: TemplateSource::Inline(template.to_string()),
        namespace: "expr".to_string(),
        registry: FragmentRegistry::new(),
        loader: Arc::new(FsLoader),
        search_path: Vec::new(),
        error_policy,
        eprefix: "[T]".to_string(),
        bypass_cache: true,
        debug: false,
    };
    let mut processor = Processor::new(config).unwrap();
    let out = processor.evaluate(params, &Value::None);
    let errors = processor.clear_errors();
    (out, errors)
}

/// Exercises `evaluate_to_sink` rather than `evaluate`.
pub fn render_to_string_sink(template: &str, params: HashMap<String, Value>) -> String {
    let config = ProcessorConfig {
        source: TemplateSource::Inline(template.to_string()),
        bypass_cache: true,
        ..ProcessorConfig::default()
    };
    let mut processor = Processor::new(config).unwrap();
    let mut buf = String::new();
    processor
        .evaluate_to_sink(params, &Value::None, Sink::String(&mut buf))
        .unwrap();
    buf
}

pub mod control_flow;
pub mod e2e_scenarios;
pub mod var_scope;
