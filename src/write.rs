//! File writers for generated configuration.
//!
//! A rebuild's validated config value is an object mapping relative output
//! paths to file contents. Each entry is rendered by the first writer whose
//! pattern matches the path; the writes of one rebuild are issued
//! concurrently and all awaited before the cycle proceeds. Parent
//! directories are created as needed.
//!
//! An output path no writer matches is a fatal condition: the whole write
//! fails and the program terminates rather than leaving a partial file set.

use crate::error::WriteError;
use regex_lite::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// A serialization format selected by matching the output path.
pub struct Writer {
    pub name: &'static str,
    pub pattern: &'static str,
    render: fn(&Value) -> Result<String, String>,
}

/// Registered writers, checked in order.
pub static WRITERS: &[Writer] = &[
    Writer {
        name: "json",
        pattern: r"\.json$",
        render: render_json,
    },
    Writer {
        name: "yaml",
        pattern: r"\.ya?ml$",
        render: render_yaml,
    },
];

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    WRITERS
        .iter()
        .map(|writer| Regex::new(writer.pattern).expect("writer pattern is a valid regex"))
        .collect()
});

fn render_json(config: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(config)
        .map(|rendered| rendered + "\n")
        .map_err(|error| error.to_string())
}

fn render_yaml(config: &Value) -> Result<String, String> {
    serde_yaml::to_string(config).map_err(|error| error.to_string())
}

/// Find the writer responsible for an output path.
pub fn find_writer(path: &str) -> Option<&'static Writer> {
    WRITERS
        .iter()
        .zip(PATTERNS.iter())
        .find(|(_, pattern)| pattern.is_match(path))
        .map(|(writer, _)| writer)
}

/// Write every output file declared by a validated config value.
///
/// `config` must be an object; each key is a file path relative to
/// `base_dir`. All entries are rendered before any file is touched, so a
/// missing writer or serialization failure never leaves a partial set.
pub async fn write_all(config: &Value, base_dir: &Path) -> Result<(), WriteError> {
    let Some(entries) = config.as_object() else {
        return Err(WriteError::NotAnObject);
    };

    let mut jobs: Vec<(PathBuf, String)> = Vec::new();
    for (rel_path, file_config) in entries {
        let Some(writer) = find_writer(rel_path) else {
            error!("no writer configured for {rel_path}");
            error!("available writers:");
            for writer in WRITERS {
                error!("  {}: {}", writer.name, writer.pattern);
            }
            return Err(WriteError::WriterNotFound {
                path: PathBuf::from(rel_path),
            });
        };
        debug!(writer = writer.name, path = %rel_path, "rendering output");
        let output = (writer.render)(file_config).map_err(|reason| WriteError::Serialize {
            path: PathBuf::from(rel_path),
            reason,
        })?;
        jobs.push((base_dir.join(rel_path), output));
    }

    let mut writes = JoinSet::new();
    for (path, output) in jobs {
        writes.spawn(write_single(path, output));
    }

    let mut first_error = None;
    while let Some(joined) = writes.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(write_error)) => {
                if first_error.is_none() {
                    first_error = Some(write_error);
                }
            }
            Err(join_error) => error!("write task failed: {join_error}"),
        }
    }
    match first_error {
        None => Ok(()),
        Some(write_error) => Err(write_error),
    }
}

async fn write_single(path: PathBuf, output: String) -> Result<(), WriteError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| WriteError::Io {
                path: path.clone(),
                source,
            })?;
    }
    tokio::fs::write(&path, output)
        .await
        .map_err(|source| WriteError::Io { path, source })
}
