//! Discovery and loading of `.regress` fixture files.

use crate::error::HarnessError;
use crate::parser::{parse, ParseError};
use crate::registry::RegistryBuilder;
use std::path::{Path, PathBuf};

pub const FIXTURE_EXTENSION: &str = "regress";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        /// File content, kept for rendering diagnostics
        content: String,
        #[source]
        error: ParseError,
    },

    #[error("invalid fixture path {}: {message}", path.display())]
    Glob { path: PathBuf, message: String },

    #[error("{}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: HarnessError,
    },
}

/// Expand directories into the `.regress` files below them, sorted.
/// Plain file paths are kept as given.
pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let pattern = path.join(format!("**/*.{FIXTURE_EXTENSION}"));
            let pattern_str = pattern.to_string_lossy();
            let entries = glob::glob(&pattern_str).map_err(|e| LoadError::Glob {
                path: path.clone(),
                message: e.to_string(),
            })?;
            let mut found = Vec::new();
            for entry in entries {
                found.push(entry.map_err(|e| LoadError::Glob {
                    path: path.clone(),
                    message: e.to_string(),
                })?);
            }
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// Read and parse one fixture file
pub fn read_fixture_file(path: &Path) -> Result<crate::fixture::Fixture, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content).map_err(|error| LoadError::Parse {
        path: path.to_path_buf(),
        content,
        error,
    })
}

/// Load every fixture file under `paths` into the builder.
/// Returns how many fixtures were registered.
pub fn load_fixtures(paths: &[PathBuf], builder: &RegistryBuilder) -> Result<usize, LoadError> {
    let files = discover(paths)?;
    for path in &files {
        let fixture = read_fixture_file(path)?;
        tracing::debug!(path = %path.display(), fixture = %fixture.name, "loaded fixture file");
        builder.register(fixture).map_err(|source| LoadError::Register {
            path: path.clone(),
            source,
        })?;
    }
    Ok(files.len())
}
