//! Depth-limited directory listing

use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".kiln",
    "__pycache__",
    ".venv",
];

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// List paths under `root` up to `max_depth` levels deep.
///
/// Entries are relative to `root`, sorted, and directories carry a trailing
/// `/`. Unreadable entries are skipped.
pub fn directory_listing(root: &Path, max_depth: usize) -> Vec<String> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
    {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let mut line = relative.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            line.push('/');
        }
        entries.push(line);
    }

    entries
}
