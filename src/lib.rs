//! # tagweave
//!
//! An HTML-like template processor: a Lexer/Parser builds an IR tree,
//! a small Code-fragment Compiler turns embedded expressions into
//! cached callables, and the Evaluator walks the tree against a
//! caller-supplied parameter map to produce output.

pub mod cache;
pub mod debug;
pub mod error;
pub mod eval;
pub mod fragment;
pub mod ir;
pub mod loader;
pub mod parser;
pub mod processor;
pub mod value;

pub use error::{Diagnostic, ErrorKind, ErrorList, ErrorPolicy, FragmentError};
pub use fragment::{FragmentContext, FragmentExecutor, FragmentRegistry};
pub use ir::Node;
pub use loader::{FsLoader, Loader, LoaderError};
pub use processor::{Processor, ProcessorConfig, Sink, TemplateSource};
pub use value::{Kind, Value};
