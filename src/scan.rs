//! Discovery of source definition files.
//!
//! Walks a root directory for files named `typefig.yaml` / `typefig.yml`,
//! following symlinks and skipping version-control and dependency-cache
//! directories by name.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// File names recognized as source definitions.
pub const FILE_NAMES: &[&str] = &["typefig.yaml", "typefig.yml"];

/// Directory names never descended into.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Recursively collect the absolute paths of every definition file under
/// `root`. The result is sorted for deterministic source ids; the set itself
/// is order-irrelevant.
pub fn scan(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root).follow_links(true).into_iter();
    for entry in walker.filter_entry(|entry| !is_ignored_dir(entry)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                debug!("skipping unreadable entry: {error}");
                continue;
            }
        };
        if entry.file_type().is_file() && is_definition_file(entry.path()) {
            let path = entry.into_path();
            found.push(std::path::absolute(&path).unwrap_or(path));
        }
    }
    found.sort();
    found
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

fn is_definition_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| FILE_NAMES.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn finds_definitions_recursively() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("typefig.yaml"));
        touch(&temp.path().join("apps/web/typefig.yml"));
        touch(&temp.path().join("apps/web/other.yaml"));

        let found = scan(temp.path());
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn skips_ignored_directories() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("typefig.yaml"));
        touch(&temp.path().join("node_modules/dep/typefig.yaml"));
        touch(&temp.path().join(".git/typefig.yaml"));
        touch(&temp.path().join("target/debug/typefig.yaml"));

        let found = scan(temp.path());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn empty_tree_yields_no_definitions() {
        let temp = TempDir::new().unwrap();
        assert!(scan(temp.path()).is_empty());
    }
}
