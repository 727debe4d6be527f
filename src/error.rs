//! Error taxonomy for the rebuild pipeline.
//!
//! Most failures abort a single rebuild cycle and leave the watch loop
//! alive, so fixing the source file triggers a fresh attempt. The only
//! fatal case is a missing writer for an output extension, which terminates
//! the whole program.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single schema violation, with the path to the offending node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    /// Dotted path from the config root, e.g. `$.package.json.name`.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// The source definition file could not be read at all.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The source definition file was read but does not have the expected shape.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("{path}: not a valid definition: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("{path}: definition declares neither a schema/config pair nor any fragments")]
    Empty { path: PathBuf },

    #[error("{path}: fragment {index} is missing its schema")]
    MissingSchema { path: PathBuf, index: usize },

    #[error("{path}: fragment {index} is missing its config")]
    MissingConfig { path: PathBuf, index: usize },
}

/// A failure while writing the generated output files.
#[derive(Debug, Error)]
pub enum WriteError {
    /// No registered writer matches the output path's extension. Fatal.
    #[error("no writer configured for {path}")]
    WriterNotFound { path: PathBuf },

    #[error("top-level config must be an object mapping file paths to file contents")]
    NotAnObject,

    #[error("failed to serialize {path}: {reason}")]
    Serialize { path: PathBuf, reason: String },

    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can abort one rebuild cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("validation failed with {count} violation(s)", count = .0.len())]
    Validation(Vec<Violation>),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("failed to spawn {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CycleError {
    /// Fatal errors terminate the whole program instead of keeping the
    /// watch loop alive.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Write(WriteError::WriterNotFound { .. }))
    }
}
