//! Backup-producing operations: full, incremental, and binlog capture.
//!
//! Each capture creates exactly one catalog entry. A timestamp collision is
//! an error, never a silent overwrite; a failed capture deletes the
//! just-created target so no partial artifact ever enters the catalog.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::{ArtifactMetadata, BackupKind, INC_SUBDIR, METADATA_FILE};
use crate::config::Config;
use crate::invoke::{binlog, BackupEngine, BackupMode, TakeBackupSpec};
use crate::utils::errors::{Error, Result};

/// Capture a full backup into `<backup_dir>/full_<ts>`.
pub fn capture_full(
    cfg: &Config,
    engine: &dyn BackupEngine,
    tables: Option<&[String]>,
) -> Result<PathBuf> {
    let target = new_target(
        &cfg.backup.backup_dir,
        BackupKind::Full,
        &cfg.backup.timestamp_format,
    )?;

    info!(target = %target.display(), "Starting full backup");
    let spec = TakeBackupSpec {
        target_dir: &target,
        mode: BackupMode::Full,
        basedir: None,
        table_scope: tables,
        threads: cfg.backup.threads,
        compress: cfg.backup.compress,
    };
    run_capture(engine, &spec, &target)?;
    write_metadata(&target, BackupKind::Full, None, tables, engine.version())?;

    info!(target = %target.display(), "Full backup completed");
    Ok(target)
}

/// Capture an incremental backup against `base` (a full or an earlier
/// incremental). The new entry lands in the chain directory of the base's
/// full backup: `<full>/inc/inc_<ts>`.
pub fn capture_incremental(
    cfg: &Config,
    engine: &dyn BackupEngine,
    base: &Path,
    tables: Option<&[String]>,
) -> Result<PathBuf> {
    if !base.is_dir() {
        return Err(Error::NotFound(base.to_path_buf()));
    }

    let base_name = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::NotFound(base.to_path_buf()))?;
    let chain_dir = if base_name.starts_with(BackupKind::Full.prefix()) {
        base.join(INC_SUBDIR)
    } else if base_name.starts_with(BackupKind::Incremental.prefix()) {
        base.parent()
            .ok_or_else(|| Error::NotFound(base.to_path_buf()))?
            .to_path_buf()
    } else {
        return Err(Error::Config(format!(
            "{} is neither a full nor an incremental backup",
            base.display()
        )));
    };
    fs::create_dir_all(&chain_dir)?;

    let target = new_target(
        &chain_dir,
        BackupKind::Incremental,
        &cfg.backup.timestamp_format,
    )?;

    info!(target = %target.display(), base = %base.display(), "Starting incremental backup");
    let spec = TakeBackupSpec {
        target_dir: &target,
        mode: BackupMode::Incremental,
        basedir: Some(base),
        table_scope: tables,
        threads: cfg.backup.threads,
        compress: cfg.backup.compress,
    };
    run_capture(engine, &spec, &target)?;
    write_metadata(
        &target,
        BackupKind::Incremental,
        Some(base),
        tables,
        engine.version(),
    )?;

    info!(target = %target.display(), "Incremental backup completed");
    Ok(target)
}

/// Capture the server's binary logs into `<backup_dir>/binlog_<ts>`.
///
/// The file list comes from the `.index` file the server maintains in its
/// binlog directory; without one, every rotated binlog-named file is taken.
/// Individually missing files are skipped with a warning.
pub fn capture_binlog(cfg: &Config) -> Result<PathBuf> {
    let binlog_dir = &cfg.binlog.binlog_dir;
    if !binlog_dir.is_dir() {
        return Err(Error::NotFound(binlog_dir.clone()));
    }

    let target = new_target(
        &cfg.backup.backup_dir,
        BackupKind::Binlog,
        &cfg.backup.timestamp_format,
    )?;

    info!(target = %target.display(), source = %binlog_dir.display(), "Starting binlog capture");
    let result = (|| -> Result<usize> {
        let mut copied = 0;
        for name in binlog_file_names(binlog_dir)? {
            let src = binlog_dir.join(&name);
            if !src.is_file() {
                warn!(file = %src.display(), "Listed binary log does not exist, skipping");
                continue;
            }
            fs::copy(&src, target.join(&name))?;
            copied += 1;
        }
        write_metadata(&target, BackupKind::Binlog, None, None, None)?;
        Ok(copied)
    })();

    match result {
        Ok(copied) => {
            info!(target = %target.display(), files = copied, "Binlog capture completed");
            Ok(target)
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&target);
            Err(e)
        }
    }
}

/// Create the capture target directory, failing on timestamp collision.
fn new_target(parent: &Path, kind: BackupKind, timestamp_format: &str) -> Result<PathBuf> {
    let ts = Local::now().format(timestamp_format);
    let target = parent.join(format!("{}{ts}", kind.prefix()));
    if target.exists() {
        return Err(Error::AlreadyExists(target));
    }
    fs::create_dir_all(&target)?;
    Ok(target)
}

fn run_capture(engine: &dyn BackupEngine, spec: &TakeBackupSpec<'_>, target: &Path) -> Result<()> {
    if let Err(e) = engine.take_backup(spec) {
        warn!(target = %target.display(), error = %e, "Capture failed, removing partial target");
        let _ = fs::remove_dir_all(target);
        return Err(e);
    }
    Ok(())
}

fn write_metadata(
    target: &Path,
    kind: BackupKind,
    base: Option<&Path>,
    tables: Option<&[String]>,
    tool_version: Option<String>,
) -> Result<()> {
    let meta = ArtifactMetadata {
        backup_type: kind.to_string(),
        timestamp: Local::now().to_rfc3339(),
        base_backup: base.map(|p| p.to_path_buf()),
        tables: tables.map(|t| t.to_vec()),
        tool_version,
    };
    let body = serde_json::to_vec_pretty(&meta)
        .map_err(|e| Error::Config(format!("metadata serialization: {e}")))?;
    fs::write(target.join(METADATA_FILE), body)?;
    Ok(())
}

/// Names of the server's binlog files, in index (rotation) order.
fn binlog_file_names(binlog_dir: &Path) -> Result<Vec<String>> {
    let index = fs::read_dir(binlog_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.extension().and_then(|x| x.to_str()) == Some("index") && p.is_file()
        });

    if let Some(index) = index {
        let listed = fs::read_to_string(&index)?
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| {
                // Index lines may carry a path prefix ("./mysql-bin.000001").
                Path::new(line)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(line)
                    .to_string()
            })
            .collect();
        return Ok(listed);
    }

    // No index file: fall back to anything shaped like a rotated binlog.
    let mut names: Vec<String> = fs::read_dir(binlog_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
        .filter(|name| binlog::is_binlog_file(name))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Fake engine that drops a marker file into the target, or fails.
    struct FakeEngine {
        fail: bool,
        backups: RefCell<Vec<(BackupMode, Option<PathBuf>)>>,
    }

    impl FakeEngine {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                backups: RefCell::new(Vec::new()),
            }
        }
    }

    impl BackupEngine for FakeEngine {
        fn take_backup(&self, spec: &TakeBackupSpec<'_>) -> Result<()> {
            self.backups
                .borrow_mut()
                .push((spec.mode, spec.basedir.map(|p| p.to_path_buf())));
            if self.fail {
                return Err(Error::ExternalToolFailure {
                    tool: "xtrabackup".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "cannot connect".to_string(),
                });
            }
            fs::write(spec.target_dir.join("xtrabackup_checkpoints"), b"ok")?;
            Ok(())
        }

        fn prepare(
            &self,
            _target_dir: &Path,
            _incremental_dir: Option<&Path>,
            _log_only: bool,
            _threads: u32,
        ) -> Result<()> {
            Ok(())
        }

        fn copy_back(&self, _prepared_dir: &Path, _table_scope: Option<&[String]>) -> Result<()> {
            Ok(())
        }
    }

    fn config(root: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.backup.backup_dir = root.join("backups");
        // Day granularity makes collisions reproducible in tests.
        cfg.backup.timestamp_format = "%Y%m%d".to_string();
        cfg.binlog.binlog_dir = root.join("binlogs");
        cfg
    }

    #[test]
    fn test_capture_full_creates_entry_with_metadata() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let engine = FakeEngine::new(false);

        let tables = vec!["shop.orders".to_string()];
        let target = capture_full(&cfg, &engine, Some(&tables)).unwrap();

        assert!(target.join("xtrabackup_checkpoints").exists());
        let meta: ArtifactMetadata =
            serde_json::from_str(&fs::read_to_string(target.join(METADATA_FILE)).unwrap())
                .unwrap();
        assert_eq!(meta.backup_type, "full");
        assert_eq!(meta.tables.as_deref(), Some(&tables[..]));
        assert_eq!(engine.backups.borrow()[0].0, BackupMode::Full);
    }

    #[test]
    fn test_timestamp_collision_is_an_error() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let engine = FakeEngine::new(false);

        capture_full(&cfg, &engine, None).unwrap();
        let err = capture_full(&cfg, &engine, None).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_failed_capture_leaves_no_partial_artifact() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let engine = FakeEngine::new(true);

        let err = capture_full(&cfg, &engine, None).unwrap_err();
        assert!(matches!(err, Error::ExternalToolFailure { .. }));
        let leftover: Vec<_> = fs::read_dir(&cfg.backup.backup_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_incremental_nests_under_full_chain() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let engine = FakeEngine::new(false);

        let full = capture_full(&cfg, &engine, None).unwrap();
        let inc = capture_incremental(&cfg, &engine, &full, None).unwrap();

        assert_eq!(inc.parent().unwrap(), full.join(INC_SUBDIR));
        assert_eq!(
            engine.backups.borrow()[1],
            (BackupMode::Incremental, Some(full.clone()))
        );
    }

    #[test]
    fn test_incremental_against_incremental_is_a_sibling() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let engine = FakeEngine::new(false);

        let chain_dir = temp.path().join("backups/full_20240101/inc");
        let base = chain_dir.join("inc_20240102");
        fs::create_dir_all(&base).unwrap();

        let inc = capture_incremental(&cfg, &engine, &base, None).unwrap();
        assert_eq!(inc.parent().unwrap(), chain_dir);
    }

    #[test]
    fn test_incremental_missing_base() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let engine = FakeEngine::new(false);

        let err =
            capture_incremental(&cfg, &engine, &temp.path().join("full_gone"), None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_capture_binlog_follows_index() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        fs::create_dir_all(&cfg.binlog.binlog_dir).unwrap();
        fs::write(cfg.binlog.binlog_dir.join("mysql-bin.000001"), b"one").unwrap();
        fs::write(cfg.binlog.binlog_dir.join("mysql-bin.000003"), b"three").unwrap();
        fs::write(
            cfg.binlog.binlog_dir.join("mysql-bin.index"),
            "./mysql-bin.000001\n./mysql-bin.000002\n./mysql-bin.000003\n",
        )
        .unwrap();

        let target = capture_binlog(&cfg).unwrap();
        assert!(target.join("mysql-bin.000001").is_file());
        assert!(target.join("mysql-bin.000003").is_file());
        // Listed but absent on disk: skipped, not fatal.
        assert!(!target.join("mysql-bin.000002").exists());
        assert!(target.join(METADATA_FILE).is_file());
    }

    #[test]
    fn test_capture_binlog_without_index_takes_rotated_files() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        fs::create_dir_all(&cfg.binlog.binlog_dir).unwrap();
        fs::write(cfg.binlog.binlog_dir.join("mysql-bin.000001"), b"one").unwrap();
        fs::write(cfg.binlog.binlog_dir.join("error.log"), b"noise").unwrap();

        let target = capture_binlog(&cfg).unwrap();
        assert!(target.join("mysql-bin.000001").is_file());
        assert!(!target.join("error.log").exists());
    }

    #[test]
    fn test_capture_binlog_missing_source_dir() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path());
        let err = capture_binlog(&cfg).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
