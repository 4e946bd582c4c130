use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tagweave::{
    ErrorPolicy, FragmentRegistry, FsLoader, Processor, ProcessorConfig, Sink, TemplateSource,
    Value,
};

/// Render a tagweave template against a JSON parameter object.
#[derive(Parser)]
struct Cli {
    /// Path to the template file. Omit to read the template from stdin.
    #[arg(long)]
    template: Option<PathBuf>,

    /// JSON object of template parameters, e.g. '{"name":"world"}'.
    #[arg(long, default_value = "{}")]
    params: String,

    /// JSON value bound as the template's private data.
    #[arg(long, default_value = "null")]
    private_data: String,

    /// `warn` | `die` | `output`.
    #[arg(long, default_value = "warn")]
    on_error: String,

    /// Colon-separated search path for `<:include>` (overrides TAGWEAVE_PATH).
    #[arg(long)]
    search_path: Option<String>,

    /// Bypass the shared parse/fragment cache for this run.
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Print a parse/evaluate/cache activity trace to stderr.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::scalar(if *b { "1" } else { "" }),
        serde_json::Value::Number(n) => Value::scalar(n.to_string()),
        serde_json::Value::String(s) => Value::scalar(s.clone()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(_) => {
            // Objects have no direct Value representation; render
            // to their JSON text instead of dropping them silently.
            Value::scalar(v.to_string())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let source = match &cli.template {
        Some(path) => TemplateSource::File(path.clone()),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("error: failed to read template from stdin: {e}");
                std::process::exit(2);
            }
            TemplateSource::Inline(buf)
        }
    };

    let params_json: serde_json::Value = match serde_json::from_str(&cli.params) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: invalid --params JSON: {e}");
            std::process::exit(2);
        }
    };
    let params: HashMap<String, Value> = match params_json {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_value(v)))
            .collect(),
        _ => {
            eprintln!("error: --params must be a JSON object");
            std::process::exit(2);
        }
    };

    let private_json: serde_json::Value = match serde_json::from_str(&cli.private_data) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: invalid --private-data JSON: {e}");
            std::process::exit(2);
        }
    };
    let private_data = json_to_value(&private_json);

    let error_policy = match ErrorPolicy::from_str(&cli.on_error) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let search_path = match &cli.search_path {
        Some(s) => std::env::split_paths(s).collect(),
        None => FsLoader::search_path_from_env(),
    };

    let config = ProcessorConfig {
        source,
        namespace: "expr".to_string(),
        registry: FragmentRegistry::new(),
        loader: Arc::new(FsLoader),
        search_path,
        error_policy,
        eprefix: String::new(),
        bypass_cache: cli.no_cache,
        debug: cli.debug,
    };

    let mut processor = match Processor::new(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let result = processor.evaluate_to_sink(params, &private_data, Sink::Writer(&mut handle));

    for diag in processor.errors() {
        eprintln!("{diag}");
    }

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
