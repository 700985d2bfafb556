//! Age-based eviction over the catalog.
//!
//! Fulls, binlog captures, and pre-restore snapshots strictly older than the
//! retention window are deleted wholesale. Incrementals are never evicted on
//! their own age; they disappear with their parent full's subtree. Deletion
//! errors are recorded per entry and never abort the sweep.

use chrono::{Duration, NaiveDateTime};
use std::fs;
use tracing::{info, warn};

use crate::catalog::{BackupEntry, BackupKind, Catalog};
use crate::lock::SubtreeLock;
use crate::utils::errors::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapAction {
    /// Dry run: would have been deleted.
    WouldDelete,
    Deleted,
    Failed(String),
}

/// One sweep decision.
#[derive(Debug)]
pub struct Reaped {
    pub entry: BackupEntry,
    pub action: ReapAction,
}

/// Apply the retention policy. Dry runs use the identical selection pass and
/// differ only in skipping the deletion itself.
pub fn sweep(
    catalog: &Catalog,
    policy: RetentionPolicy,
    dry_run: bool,
    now: NaiveDateTime,
) -> Result<Vec<Reaped>> {
    let cutoff = now - Duration::days(policy.max_age_days);
    info!(%cutoff, dry_run, "Retention sweep");

    let mut reaped = Vec::new();
    for entry in catalog.list(None)? {
        if !is_eligible(entry.kind) {
            continue;
        }
        if entry.created_at >= cutoff {
            continue;
        }

        let action = if dry_run {
            ReapAction::WouldDelete
        } else {
            match evict(catalog, &entry) {
                Ok(()) => {
                    info!(entry = %entry.name(), "Evicted expired backup");
                    ReapAction::Deleted
                }
                Err(e) => {
                    warn!(entry = %entry.name(), error = %e, "Eviction failed, continuing sweep");
                    ReapAction::Failed(e.to_string())
                }
            }
        };
        reaped.push(Reaped { entry, action });
    }

    Ok(reaped)
}

fn is_eligible(kind: BackupKind) -> bool {
    matches!(
        kind,
        BackupKind::Full | BackupKind::Binlog | BackupKind::PreRestoreSnapshot
    )
}

fn evict(catalog: &Catalog, entry: &BackupEntry) -> Result<()> {
    // An eviction of a full backup removes its whole chain subtree; it must
    // not race a merge reading the same subtree.
    let _lock = if entry.kind == BackupKind::Full {
        Some(SubtreeLock::acquire(catalog.root(), entry.name())?)
    } else {
        None
    };

    if entry.packed {
        fs::remove_file(&entry.location)?;
    } else {
        fs::remove_dir_all(&entry.location)?;
    }
    Ok(())
}
