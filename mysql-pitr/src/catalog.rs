//! Backup catalog: enumerates, classifies, and timestamps the artifacts
//! under the backup root.
//!
//! The filesystem is the single source of truth. Nothing is cached between
//! calls; every query re-walks the root so entries added or evicted by other
//! invocations are always visible. Artifacts are recognized purely by
//! naming convention (kind prefix + timestamp, optionally `.tar.gz`);
//! anything else under the root is ignored.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::archive;
use crate::utils::errors::{Error, Result};

/// Subdirectory of a full backup holding its incremental chain.
pub const INC_SUBDIR: &str = "inc";

/// Name of the per-artifact metadata sidecar.
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupKind {
    Full,
    Incremental,
    Binlog,
    PreRestoreSnapshot,
}

impl BackupKind {
    /// Fixed on-disk name prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            BackupKind::Full => "full_",
            BackupKind::Incremental => "inc_",
            BackupKind::Binlog => "binlog_",
            BackupKind::PreRestoreSnapshot => "pre_restore_backup_",
        }
    }

    /// Classify a bare artifact name (archive suffix already stripped),
    /// returning the kind and the embedded timestamp text.
    ///
    /// `pre_restore_backup_` must be tested before the shorter prefixes so
    /// a snapshot is never misread.
    fn parse(name: &str) -> Option<(BackupKind, &str)> {
        for kind in [
            BackupKind::PreRestoreSnapshot,
            BackupKind::Full,
            BackupKind::Incremental,
            BackupKind::Binlog,
        ] {
            if let Some(ts) = name.strip_prefix(kind.prefix()) {
                return Some((kind, ts));
            }
        }
        None
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Binlog => "binlog",
            BackupKind::PreRestoreSnapshot => "pre-restore-snapshot",
        };
        f.write_str(s)
    }
}

/// Sidecar written into every captured artifact. The catalog reads it back
/// for the table scope; the names on disk remain authoritative for kind and
/// ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub backup_type: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_backup: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
}

/// The catalog's unit of record.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub kind: BackupKind,
    /// Directory (unpacked) or `.tar.gz` file (packed).
    pub location: PathBuf,
    pub created_at: NaiveDateTime,
    /// For incrementals, the full backup directory their chain terminates at.
    pub parent: Option<PathBuf>,
    pub packed: bool,
    /// Table patterns this entry restricts to; `None` means all tables.
    pub table_scope: Option<Vec<String>>,
}

impl BackupEntry {
    /// Artifact name without the archive suffix.
    pub fn name(&self) -> &str {
        let name = self
            .location
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        name.strip_suffix(archive::ARCHIVE_SUFFIX).unwrap_or(name)
    }

    /// Where this entry lives (or would live) in unpacked form.
    pub fn unpacked_location(&self) -> PathBuf {
        if self.packed {
            archive::unpacked_path(&self.location)
        } else {
            self.location.clone()
        }
    }

    /// Directory holding this entry's incremental chain (full backups only).
    pub fn inc_dir(&self) -> PathBuf {
        self.unpacked_location().join(INC_SUBDIR)
    }
}

/// Stateless view over the backup root.
pub struct Catalog {
    root: PathBuf,
    timestamp_format: String,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>, timestamp_format: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            timestamp_format: timestamp_format.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timestamp_format(&self) -> &str {
        &self.timestamp_format
    }

    /// All entries (optionally restricted to one kind), ascending by
    /// `created_at`. Recomputed from the filesystem on every call.
    pub fn list(&self, kind: Option<BackupKind>) -> Result<Vec<BackupEntry>> {
        let mut entries = Vec::new();
        if self.root.is_dir() {
            self.scan_dir(&self.root, &mut entries)?;
        }
        if let Some(kind) = kind {
            entries.retain(|e| e.kind == kind);
        }
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.location.cmp(&b.location))
        });
        Ok(entries)
    }

    /// The most recent full backup, or `NotFound` when none exists.
    pub fn latest_full(&self) -> Result<BackupEntry> {
        self.list(Some(BackupKind::Full))?
            .into_iter()
            .next_back()
            .ok_or_else(|| Error::NotFound(self.root.clone()))
    }

    /// The incremental chain of a full backup, ascending by `created_at`.
    ///
    /// A packed full hides its subtree; callers that need the chain unpack
    /// the full first (the resolver does).
    pub fn incrementals_of(&self, full: &BackupEntry) -> Result<Vec<BackupEntry>> {
        let inc_dir = full.inc_dir();
        let mut chain = Vec::new();
        if inc_dir.is_dir() {
            let chain_root = full.unpacked_location();
            for child in fs::read_dir(&inc_dir)? {
                let child = child?;
                if let Some(mut entry) = self.classify(&child.path()) {
                    if entry.kind == BackupKind::Incremental {
                        entry.parent = Some(chain_root.clone());
                        chain.push(entry);
                    }
                }
            }
        }
        chain.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.location.cmp(&b.location))
        });
        Ok(chain)
    }

    /// Find the catalog entry whose location is `path`.
    pub fn entry_at(&self, path: &Path) -> Result<BackupEntry> {
        self.classify(path)
            .ok_or_else(|| Error::NotFound(path.to_path_buf()))
    }

    /// Walk one directory level. Recognized artifacts become entries and are
    /// not descended into (except a full backup's `inc/` chain); anything
    /// else that is a directory is assumed to be a date partition and
    /// recursed through transparently.
    fn scan_dir(&self, dir: &Path, out: &mut Vec<BackupEntry>) -> Result<()> {
        for child in fs::read_dir(dir)? {
            let child = child?;
            let path = child.path();
            match self.classify(&path) {
                Some(entry) => {
                    if entry.kind == BackupKind::Incremental {
                        // Chain members are only meaningful under their
                        // full backup; stray top-level inc_ dirs are noise.
                        debug!(path = %path.display(), "Ignoring incremental outside a chain");
                        continue;
                    }
                    if entry.kind == BackupKind::Full && !entry.packed {
                        let mut chain = self.incrementals_of(&entry)?;
                        out.push(entry);
                        out.append(&mut chain);
                    } else {
                        out.push(entry);
                    }
                }
                None => {
                    // Dot-prefixed directories are operational scratch space
                    // (.locks, merge working copies), never catalog content.
                    let hidden = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with('.'))
                        .unwrap_or(true);
                    if path.is_dir() && !hidden {
                        self.scan_dir(&path, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Classify a single path into an entry, or `None` if it does not follow
    /// the naming convention.
    fn classify(&self, path: &Path) -> Option<BackupEntry> {
        let file_name = path.file_name()?.to_str()?;
        let packed = archive::is_archive(path);
        if packed && !path.is_file() {
            return None;
        }
        if !packed && !path.is_dir() {
            return None;
        }
        let bare = if packed {
            file_name.strip_suffix(archive::ARCHIVE_SUFFIX)?
        } else {
            file_name
        };
        let (kind, ts) = BackupKind::parse(bare)?;
        let created_at = self.created_at(ts, path);
        let table_scope = if packed {
            None
        } else {
            read_table_scope(path)
        };
        Some(BackupEntry {
            kind,
            location: path.to_path_buf(),
            created_at,
            parent: None,
            packed,
            table_scope,
        })
    }

    /// Resolve an entry's creation instant. The name's embedded timestamp is
    /// authoritative (configured format, then a bare date); the backing
    /// store's file time is only a fallback for names that do not parse.
    ///
    /// A bare date maps to the end of that day: an artifact stamped only
    /// with a date was created at some point during it, so it must sort
    /// after any instant earlier in the same day. A midnight mapping would
    /// let a day's incremental slip into a recovery targeting that day's
    /// start.
    fn created_at(&self, ts: &str, path: &Path) -> NaiveDateTime {
        if let Ok(dt) = NaiveDateTime::parse_from_str(ts, &self.timestamp_format) {
            return dt;
        }
        if let Ok(d) = NaiveDate::parse_from_str(ts, "%Y%m%d") {
            if let Some(dt) = d.and_hms_opt(23, 59, 59) {
                return dt;
            }
        }
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|t| chrono::DateTime::<chrono::Local>::from(t).naive_local())
            .unwrap_or_default()
    }
}

fn read_table_scope(dir: &Path) -> Option<Vec<String>> {
    let raw = fs::read_to_string(dir.join(METADATA_FILE)).ok()?;
    let meta: ArtifactMetadata = serde_json::from_str(&raw).ok()?;
    meta.tables
}
