//! Error Reporter: diagnostics, append-only per-processor error
//! list with cursor semantics, and the `onerror` dispatch policy.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Load,
    Parse,
    FragmentCompile,
    FragmentRuntime,
    Sink,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Load => "load",
            ErrorKind::Parse => "parse",
            ErrorKind::FragmentCompile => "fragment-compile",
            ErrorKind::FragmentRuntime => "fragment-runtime",
            ErrorKind::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// A single reported problem, always carrying the processor's configured
/// `eprefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub eprefix: String,
    pub message: String,
    pub span: Option<(usize, usize)>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, eprefix: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            eprefix: eprefix.to_string(),
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some((start, end));
        self
    }

    /// Text injected at the failure site under `onerror=output`.
    pub fn display_text(&self) -> String {
        format!("{}{}", self.eprefix, self.message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} ({})", self.eprefix, self.message, self.kind)
    }
}

/// Append-only diagnostics list. `clear_errors()` honors the cursor taken
/// at the start of the most recent `evaluate` call.
#[derive(Debug, Default)]
pub struct ErrorList {
    entries: Vec<Diagnostic>,
}

impl ErrorList {
    pub fn new() -> Self {
        ErrorList::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.entries.push(d);
    }

    pub fn cursor(&self) -> usize {
        self.entries.len()
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn since(&self, cursor: usize) -> &[Diagnostic] {
        &self.entries[cursor.min(self.entries.len())..]
    }

    /// Drops everything recorded before `cursor`, keeping the tail —
    /// matches `clear_errors()` returning only diagnostics from the most
    /// recent `evaluate()` call.
    pub fn clear_before(&mut self, cursor: usize) -> Vec<Diagnostic> {
        let tail: Vec<_> = self.entries.split_off(cursor.min(self.entries.len()));
        self.entries.clear();
        tail
    }
}

/// A fragment-runtime error, returned by `FragmentExecutor::invoke`.
#[derive(Debug, Clone)]
pub struct FragmentError(pub String);

impl fmt::Display for FragmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FragmentError {}

/// The `onerror` policy. `Callable` wraps a closure invoked
/// with the diagnostic message; its return value replaces the failing
/// node's output.
#[derive(Clone)]
pub enum ErrorPolicy {
    Warn,
    Die,
    Output,
    Callable(Arc<dyn Fn(&str) -> Value + Send + Sync>),
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Warn => write!(f, "Warn"),
            ErrorPolicy::Die => write!(f, "Die"),
            ErrorPolicy::Output => write!(f, "Output"),
            ErrorPolicy::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

impl ErrorPolicy {
    /// Parse the literal `"warn"`/`"die"`/`"output"` configuration
    /// strings; any other value is a construction-time configuration error.
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "warn" => Ok(ErrorPolicy::Warn),
            "die" => Ok(ErrorPolicy::Die),
            "output" => Ok(ErrorPolicy::Output),
            other => Err(format!("unknown error policy {other:?}")),
        }
    }
}

/// The high-level outcome of dispatching a fragment-runtime error through
/// the configured policy.
pub enum Dispatch {
    /// Substitute this value at the failure site and keep going.
    Substitute(Value),
    /// Abort the current `evaluate` call; partial output is discarded.
    Abort,
}

/// Dispatches a fragment-runtime error per the processor's `onerror`
/// policy, appending a diagnostic to `errors` as a side effect.
pub fn dispatch_fragment_error(
    policy: &ErrorPolicy,
    errors: &mut ErrorList,
    eprefix: &str,
    message: &str,
) -> Dispatch {
    let diag = Diagnostic::new(ErrorKind::FragmentRuntime, eprefix, message);
    match policy {
        ErrorPolicy::Warn => {
            eprintln!("{}", diag);
            errors.push(diag);
            Dispatch::Substitute(Value::None)
        }
        ErrorPolicy::Die => {
            errors.push(diag);
            Dispatch::Abort
        }
        ErrorPolicy::Output => {
            let text = diag.display_text();
            errors.push(diag);
            Dispatch::Substitute(Value::Scalar(text))
        }
        ErrorPolicy::Callable(f) => {
            errors.push(diag);
            Dispatch::Substitute(f(message))
        }
    }
}
