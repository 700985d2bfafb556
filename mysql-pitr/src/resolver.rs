//! Lineage resolution: map a recovery instant or interval to the minimal
//! sufficient set of catalog entries.

use chrono::NaiveDateTime;
use tracing::info;

use crate::archive;
use crate::catalog::{BackupEntry, BackupKind, Catalog};
use crate::utils::errors::{Error, Result};

/// The entries a recovery needs, in application order: one full backup, its
/// incremental chain up to the target, and the binlog captures overlapping
/// the interval.
#[derive(Debug, Clone)]
pub struct Lineage {
    pub full: BackupEntry,
    pub incrementals: Vec<BackupEntry>,
    pub binlogs: Vec<BackupEntry>,
}

/// Resolve the lineage for a single recovery instant: the most recent state
/// at or before `instant`.
pub fn resolve_at(catalog: &Catalog, instant: NaiveDateTime) -> Result<Lineage> {
    resolve_range(catalog, instant, instant)
}

/// Resolve the lineage for a `[start, end]` recovery interval.
///
/// The base selection depends only on `end`: the newest full backup not
/// newer than `end`, then every chain member and binlog capture created at
/// or before `end`. Binlog captures are included when their creation
/// instant lies in `[full.created_at, end]`; `start` only narrows the
/// replay window handed to the log-apply tool, never the artifact set.
pub fn resolve_range(
    catalog: &Catalog,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Lineage> {
    if start > end {
        return Err(Error::Config(format!(
            "recovery interval start {start} is after end {end}"
        )));
    }

    let full = catalog
        .list(Some(BackupKind::Full))?
        .into_iter()
        .rev()
        .find(|f| f.created_at <= end)
        .ok_or(Error::NoSuitableFullBackup(end))?;

    // Chain resolution reads the full backup's inc/ subtree, so a packed
    // full must come out of its archive first.
    let full = if full.packed {
        let dir = archive::unpack(&full.location)?;
        catalog.entry_at(&dir)?
    } else {
        full
    };

    let incrementals: Vec<BackupEntry> = catalog
        .incrementals_of(&full)?
        .into_iter()
        .filter(|inc| inc.created_at <= end)
        .collect();

    let binlogs: Vec<BackupEntry> = catalog
        .list(Some(BackupKind::Binlog))?
        .into_iter()
        .filter(|b| b.created_at >= full.created_at && b.created_at <= end)
        .collect();

    info!(
        full = %full.name(),
        incrementals = incrementals.len(),
        binlogs = binlogs.len(),
        target = %end,
        "Resolved recovery lineage"
    );

    Ok(Lineage {
        full,
        incrementals,
        binlogs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn catalog(root: &Path) -> Catalog {
        Catalog::new(root, "%Y%m%d_%H%M%S")
    }

    fn mkdir(root: &Path, rel: &str) {
        fs::create_dir_all(root.join(rel)).unwrap();
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// The worked example: full_20240101 with two incrementals and two
    /// binlog captures, target 2024-01-03T00:00:00. The Jan-3 incremental
    /// was created during Jan 3, after the target instant, so it stays out.
    #[test]
    fn test_point_in_time_selection() {
        let temp = TempDir::new().unwrap();
        mkdir(temp.path(), "full_20240101");
        mkdir(temp.path(), "full_20240101/inc/inc_20240102");
        mkdir(temp.path(), "full_20240101/inc/inc_20240103");
        mkdir(temp.path(), "binlog_20240102");
        mkdir(temp.path(), "binlog_20240104");

        let lineage = resolve_at(&catalog(temp.path()), at(2024, 1, 3)).unwrap();

        assert_eq!(lineage.full.name(), "full_20240101");
        assert_eq!(
            lineage
                .incrementals
                .iter()
                .map(|e| e.name().to_string())
                .collect::<Vec<_>>(),
            vec!["inc_20240102"]
        );
        assert_eq!(
            lineage
                .binlogs
                .iter()
                .map(|e| e.name().to_string())
                .collect::<Vec<_>>(),
            vec!["binlog_20240102"]
        );
    }

    #[test]
    fn test_target_before_oldest_full_fails() {
        let temp = TempDir::new().unwrap();
        mkdir(temp.path(), "full_20240201");

        let err = resolve_at(&catalog(temp.path()), at(2024, 1, 15)).unwrap_err();
        assert!(matches!(err, Error::NoSuitableFullBackup(_)));
    }

    #[test]
    fn test_selects_maximal_qualifying_full() {
        let temp = TempDir::new().unwrap();
        mkdir(temp.path(), "full_20240101");
        mkdir(temp.path(), "full_20240201");
        mkdir(temp.path(), "full_20240401");

        let lineage = resolve_at(&catalog(temp.path()), at(2024, 3, 1)).unwrap();
        assert_eq!(lineage.full.name(), "full_20240201");
    }

    #[test]
    fn test_full_only_lineage_is_valid() {
        let temp = TempDir::new().unwrap();
        mkdir(temp.path(), "full_20240101");

        let lineage = resolve_at(&catalog(temp.path()), at(2024, 6, 1)).unwrap();
        assert!(lineage.incrementals.is_empty());
        assert!(lineage.binlogs.is_empty());
    }

    #[test]
    fn test_packed_full_is_unpacked_for_chain_resolution() {
        let temp = TempDir::new().unwrap();
        let full_dir = temp.path().join("full_20240101");
        fs::create_dir_all(full_dir.join("inc/inc_20240102")).unwrap();
        fs::write(full_dir.join("xtrabackup_checkpoints"), b"full").unwrap();
        archive::pack(&full_dir).unwrap();
        assert!(!full_dir.exists());

        let lineage = resolve_at(&catalog(temp.path()), at(2024, 2, 1)).unwrap();
        assert!(!lineage.full.packed);
        assert!(full_dir.is_dir(), "resolution must unpack the full backup");
        assert_eq!(lineage.incrementals.len(), 1);
    }

    #[test]
    fn test_inverted_interval_rejected() {
        let temp = TempDir::new().unwrap();
        mkdir(temp.path(), "full_20240101");
        let err =
            resolve_range(&catalog(temp.path()), at(2024, 2, 1), at(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_binlog_on_full_boundary_included() {
        let temp = TempDir::new().unwrap();
        mkdir(temp.path(), "full_20240101");
        mkdir(temp.path(), "binlog_20240101");
        mkdir(temp.path(), "binlog_20231231");

        let lineage = resolve_at(&catalog(temp.path()), at(2024, 1, 2)).unwrap();
        assert_eq!(lineage.binlogs.len(), 1);
        assert_eq!(lineage.binlogs[0].name(), "binlog_20240101");
    }
}
