//! Tracer: eprintln-gated tracing for parse/evaluate activity.
//! No log/tracing crate — diagnostics stay plain `eprintln!` under an
//! explicit enable flag.

/// An execution-path marker, printed at entry/exit of a traced stage.
#[derive(Debug, Clone)]
pub struct Tracer {
    enabled: bool,
    path: Vec<String>,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Tracer {
            enabled,
            path: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns a child tracer with `label` appended to the path, used
    /// to nest traces across a `For`/`Eval`/`Include` boundary.
    pub fn with_label(&self, label: &str) -> Self {
        let mut path = self.path.clone();
        path.push(label.to_string());
        Tracer {
            enabled: self.enabled,
            path,
        }
    }

    fn path_text(&self) -> String {
        self.path.join(" > ")
    }

    pub fn trace_parse(&self, source: &str) {
        if !self.enabled {
            return;
        }
        eprintln!("TRACE: parse {:?}", truncate(source));
    }

    pub fn trace_cache_hit(&self, table: &str, key: u64) {
        if !self.enabled {
            return;
        }
        eprintln!("TRACE: cache hit [{table}] key={key}");
    }

    pub fn trace_cache_miss(&self, table: &str, key: u64) {
        if !self.enabled {
            return;
        }
        eprintln!("TRACE: cache miss [{table}] key={key}");
    }

    pub fn trace_node(&self, what: &str) {
        if !self.enabled {
            return;
        }
        let path = self.path_text();
        if path.is_empty() {
            eprintln!("TRACE: {what}");
        } else {
            eprintln!("TRACE: [{path}] {what}");
        }
    }

    pub fn trace_error(&self, message: &str) {
        if !self.enabled {
            return;
        }
        eprintln!("TRACE: error: {message}");
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
