//! The filesystem loader. Out of the core's responsibility per spec, but
//! shipped as a default so the crate is runnable end to end.

use std::path::{Path, PathBuf};

/// `resolve(name, path) -> bytes`, the one operation the core consumes
/// from the loader.
pub trait Loader: Send + Sync {
    fn resolve(&self, name: &str, search_path: &[PathBuf]) -> Result<Vec<u8>, LoaderError>;
}

#[derive(Debug, Clone)]
pub struct LoaderError(pub String);

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for LoaderError {}

/// Default loader: resolves `name` against each entry of the search
/// path in order, falling back to the current directory when the path
/// is empty.
pub struct FsLoader;

impl FsLoader {
    /// Reads `TAGWEAVE_PATH` split on the platform path separator (spec
    /// §6 "Environment input").
    pub fn search_path_from_env() -> Vec<PathBuf> {
        match std::env::var_os("TAGWEAVE_PATH") {
            Some(val) => std::env::split_paths(&val).collect(),
            None => Vec::new(),
        }
    }
}

impl Loader for FsLoader {
    fn resolve(&self, name: &str, search_path: &[PathBuf]) -> Result<Vec<u8>, LoaderError> {
        if Path::new(name).is_absolute() {
            return std::fs::read(name).map_err(|e| LoaderError(format!("{name}: {e}")));
        }
        if search_path.is_empty() {
            return std::fs::read(name).map_err(|e| LoaderError(format!("{name}: {e}")));
        }
        for dir in search_path {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return std::fs::read(&candidate)
                    .map_err(|e| LoaderError(format!("{}: {e}", candidate.display())));
            }
        }
        Err(LoaderError(format!(
            "{name}: not found in search path ({} entries)",
            search_path.len()
        )))
    }
}
