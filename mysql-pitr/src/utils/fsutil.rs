//! Filesystem helpers shared by the catalog, merge engine, and restore path.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::utils::errors::Result;

/// Recursively copy a directory tree. The destination must not pre-exist;
/// it is created as the first step so a failure part-way leaves an
/// obviously-incomplete tree under `dst` and never touches `src`.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0u64;
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copied += fs::copy(entry.path(), &target)?;
        }
        // Sockets, fifos and symlinks have no business inside a physical
        // backup tree; skip them rather than fail the whole copy.
    }

    Ok(copied)
}

/// Total size in bytes of all regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Format a byte count for display (`1536` -> `"1.50 KB"`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Parse a comma-separated table filter ("db1.t1, db2.*") into patterns.
pub fn parse_table_filter(filter: &str) -> Vec<String> {
    filter
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Check whether a fully-qualified table name (`db.table`) matches any of
/// the given patterns. `*` wildcards either side of the dot. An empty
/// pattern list matches everything.
pub fn match_table(table: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let (t_db, t_table) = match table.split_once('.') {
        Some(parts) => parts,
        None => ("", table),
    };
    patterns.iter().any(|pattern| match pattern.split_once('.') {
        Some((db, tbl)) => {
            (db == "*" || db == t_db) && (tbl == "*" || tbl == t_table)
        }
        None => pattern == table,
    })
}
