//! Restore orchestration: from catalog entries back into the live data
//! directory.
//!
//! Every restore follows the same spine: resolve what to apply, merge the
//! chain into a disposable prepared base, stop the database, optionally
//! snapshot the existing data directory, copy the base back, restart the
//! database, and finally replay binary logs when the target calls for them.

use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::archive;
use crate::catalog::{BackupEntry, BackupKind, Catalog};
use crate::config::Config;
use crate::invoke::{self, binlog, BackupEngine, LogReplayer, ServiceController};
use crate::merge::ChainMerge;
use crate::resolver::{self, Lineage};
use crate::utils::errors::{Error, Result};
use crate::utils::fsutil;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Snapshot the live data directory into a `pre_restore_backup_` entry
    /// before overwriting it.
    pub snapshot_existing: bool,
    /// Restrict the restore to these table patterns.
    pub tables: Option<Vec<String>>,
}

/// Ties the collaborators together for restore flows.
pub struct Restorer<'a> {
    cfg: &'a Config,
    engine: &'a dyn BackupEngine,
    replayer: &'a dyn LogReplayer,
    services: &'a ServiceController,
}

impl<'a> Restorer<'a> {
    pub fn new(
        cfg: &'a Config,
        engine: &'a dyn BackupEngine,
        replayer: &'a dyn LogReplayer,
        services: &'a ServiceController,
    ) -> Self {
        Self {
            cfg,
            engine,
            replayer,
            services,
        }
    }

    fn catalog(&self) -> Catalog {
        Catalog::new(
            &self.cfg.backup.backup_dir,
            &self.cfg.backup.timestamp_format,
        )
    }

    /// Restore a single full backup, ignoring any incremental chain it has.
    pub fn restore_full(&self, backup_path: &Path, opts: &RestoreOptions) -> Result<()> {
        let catalog = self.catalog();
        let full = self.full_entry(&catalog, backup_path)?;
        let lineage = Lineage {
            full,
            incrementals: Vec::new(),
            binlogs: Vec::new(),
        };
        self.restore_lineage(&catalog, &lineage, opts, None, None)
    }

    /// Restore a full backup together with its entire incremental chain.
    pub fn restore_chain(&self, full_path: &Path, opts: &RestoreOptions) -> Result<()> {
        let catalog = self.catalog();
        let full = self.full_entry(&catalog, full_path)?;
        let incrementals = catalog.incrementals_of(&full)?;
        let lineage = Lineage {
            full,
            incrementals,
            binlogs: Vec::new(),
        };
        self.restore_lineage(&catalog, &lineage, opts, None, None)
    }

    /// Point-in-time recovery to `end`, optionally replaying logs only from
    /// `start` onward.
    pub fn restore_point_in_time(
        &self,
        start: Option<NaiveDateTime>,
        end: NaiveDateTime,
        opts: &RestoreOptions,
    ) -> Result<()> {
        let catalog = self.catalog();
        let lineage = resolver::resolve_range(&catalog, start.unwrap_or(end), end)?;
        self.restore_lineage(&catalog, &lineage, opts, start, Some(end))
    }

    /// Replay the given binlog captures against the running database without
    /// touching physical backups.
    pub fn replay_binlogs(
        &self,
        capture_paths: &[PathBuf],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        tables: Option<&[String]>,
    ) -> Result<()> {
        let mut dirs = Vec::with_capacity(capture_paths.len());
        for path in capture_paths {
            if archive::is_archive(path) {
                dirs.push(archive::unpack(path)?);
            } else {
                dirs.push(path.clone());
            }
        }
        let files = binlog::collect_binlog_files(&dirs)?;
        self.replayer.apply(&files, start, end, tables)
    }

    fn full_entry(&self, catalog: &Catalog, path: &Path) -> Result<BackupEntry> {
        let entry = catalog.entry_at(path)?;
        if entry.kind != BackupKind::Full {
            return Err(Error::Config(format!(
                "{} is not a full backup",
                path.display()
            )));
        }
        if entry.packed {
            let dir = archive::unpack(&entry.location)?;
            catalog.entry_at(&dir)
        } else {
            Ok(entry)
        }
    }

    fn restore_lineage(
        &self,
        catalog: &Catalog,
        lineage: &Lineage,
        opts: &RestoreOptions,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<()> {
        info!(
            full = %lineage.full.name(),
            incrementals = lineage.incrementals.len(),
            binlogs = lineage.binlogs.len(),
            "Starting restore"
        );

        // A table-scoped backup can only yield tables it captured.
        if let (Some(requested), Some(scope)) = (&opts.tables, &lineage.full.table_scope) {
            for table in requested {
                if !table.contains('*') && !fsutil::match_table(table, scope) {
                    return Err(Error::Config(format!(
                        "table {table} is not covered by {}'s table scope",
                        lineage.full.name()
                    )));
                }
            }
        }

        let merge = ChainMerge::new(self.engine, self.cfg.backup.threads);
        let prepared = merge.run(catalog, lineage)?;
        self.copy_back(prepared.path(), opts)?;
        drop(prepared);

        if !lineage.binlogs.is_empty() {
            let mut dirs = Vec::with_capacity(lineage.binlogs.len());
            for entry in &lineage.binlogs {
                if entry.packed {
                    dirs.push(archive::unpack(&entry.location)?);
                } else {
                    dirs.push(entry.location.clone());
                }
            }
            let files = binlog::collect_binlog_files(&dirs)?;
            self.replayer
                .apply(&files, start, end, opts.tables.as_deref())?;
        }

        info!("Restore completed");
        Ok(())
    }

    /// Stop the database, optionally snapshot the old data directory, write
    /// the prepared base back, and restart. The restart is attempted even
    /// when copy-back fails so a broken restore does not also leave the
    /// service down.
    fn copy_back(&self, prepared: &Path, opts: &RestoreOptions) -> Result<()> {
        self.services.stop()?;

        if opts.snapshot_existing {
            if let Err(e) = self.snapshot_existing_data() {
                warn!(error = %e, "Pre-restore snapshot failed, restarting service");
                let _ = self.services.start();
                return Err(e);
            }
        }

        let copied = self.engine.copy_back(prepared, opts.tables.as_deref());
        if copied.is_ok() {
            self.fix_ownership();
        } else {
            warn!("Copy-back failed, attempting to restart the service anyway");
        }
        let started = self.services.start();

        copied?;
        started
    }

    /// Copy the live data directory into a `pre_restore_backup_` catalog
    /// entry. Runs with the database already stopped.
    fn snapshot_existing_data(&self) -> Result<PathBuf> {
        let datadir = &self.cfg.database.datadir;
        if !datadir.is_dir() {
            return Err(Error::NotFound(datadir.clone()));
        }
        let ts = Local::now().format(&self.cfg.backup.timestamp_format);
        let target = self
            .cfg
            .backup
            .backup_dir
            .join(format!("{}{ts}", BackupKind::PreRestoreSnapshot.prefix()));
        if target.exists() {
            return Err(Error::AlreadyExists(target));
        }
        let bytes = fsutil::copy_tree(datadir, &target)?;
        info!(
            snapshot = %target.display(),
            size = %fsutil::format_size(bytes),
            "Snapshotted existing data directory"
        );
        Ok(target)
    }

    fn fix_ownership(&self) {
        let datadir = &self.cfg.database.datadir;
        let mut cmd = Command::new("chown");
        cmd.arg("-R")
            .arg(&self.cfg.service.owner)
            .arg(datadir);
        if let Err(e) = invoke::run_checked("chown", &mut cmd) {
            warn!(error = %e, datadir = %datadir.display(), "Could not fix data directory ownership");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::INC_SUBDIR;
    use crate::invoke::{ServiceAction, ServiceStrategy, TakeBackupSpec};
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeEngine {
        prepares: RefCell<Vec<(Option<PathBuf>, bool)>>,
        copy_backs: RefCell<Vec<PathBuf>>,
        fail_copy_back: bool,
    }

    impl BackupEngine for FakeEngine {
        fn take_backup(&self, _spec: &TakeBackupSpec<'_>) -> Result<()> {
            Ok(())
        }

        fn prepare(
            &self,
            _target_dir: &Path,
            incremental_dir: Option<&Path>,
            log_only: bool,
            _threads: u32,
        ) -> Result<()> {
            self.prepares
                .borrow_mut()
                .push((incremental_dir.map(|p| p.to_path_buf()), log_only));
            Ok(())
        }

        fn copy_back(&self, prepared_dir: &Path, _table_scope: Option<&[String]>) -> Result<()> {
            assert!(
                prepared_dir.is_dir(),
                "prepared base must still exist during copy-back"
            );
            self.copy_backs.borrow_mut().push(prepared_dir.to_path_buf());
            if self.fail_copy_back {
                return Err(Error::ExternalToolFailure {
                    tool: "xtrabackup".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "copy-back blew up".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeReplayer {
        calls: RefCell<Vec<(Vec<PathBuf>, Option<NaiveDateTime>, Option<NaiveDateTime>)>>,
    }

    impl LogReplayer for FakeReplayer {
        fn apply(
            &self,
            files: &[PathBuf],
            start: Option<NaiveDateTime>,
            end: Option<NaiveDateTime>,
            _tables: Option<&[String]>,
        ) -> Result<()> {
            self.calls.borrow_mut().push((files.to_vec(), start, end));
            Ok(())
        }
    }

    struct SharedLog(Rc<RefCell<Vec<ServiceAction>>>);

    impl ServiceStrategy for SharedLog {
        fn label(&self) -> &str {
            "fake"
        }

        fn run(&self, action: ServiceAction, _service: &str) -> Result<()> {
            self.0.borrow_mut().push(action);
            Ok(())
        }
    }

    struct Fixture {
        _temp: TempDir,
        cfg: Config,
        service_log: Rc<RefCell<Vec<ServiceAction>>>,
        services: ServiceController,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.backup.backup_dir = temp.path().join("backups");
        cfg.database.datadir = temp.path().join("datadir");
        fs::create_dir_all(&cfg.backup.backup_dir).unwrap();
        fs::create_dir_all(&cfg.database.datadir).unwrap();
        fs::write(cfg.database.datadir.join("ibdata1"), b"live pages").unwrap();

        let service_log = Rc::new(RefCell::new(Vec::new()));
        let services = ServiceController::with_strategies(
            "mysql",
            vec![Box::new(SharedLog(service_log.clone()))],
        );
        Fixture {
            _temp: temp,
            cfg,
            service_log,
            services,
        }
    }

    fn seed_chain(root: &Path) {
        let full = root.join("full_20240101");
        fs::create_dir_all(&full).unwrap();
        fs::write(full.join("xtrabackup_checkpoints"), b"full").unwrap();
        fs::create_dir_all(full.join(INC_SUBDIR).join("inc_20240102")).unwrap();
        let binlog = root.join("binlog_20240102");
        fs::create_dir_all(&binlog).unwrap();
        fs::write(binlog.join("mysql-bin.000001"), b"events").unwrap();
        fs::create_dir_all(root.join("binlog_20240104")).unwrap();
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_point_in_time_restore_end_to_end() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let engine = FakeEngine::default();
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        let opts = RestoreOptions {
            snapshot_existing: true,
            tables: None,
        };
        restorer
            .restore_point_in_time(None, at(2024, 1, 3), &opts)
            .unwrap();

        // Merge protocol: full log-only, single incremental terminal.
        let prepares = engine.prepares.borrow();
        assert_eq!(prepares.len(), 2);
        assert_eq!(prepares[0], (None, true));
        assert!(!prepares[1].1);

        assert_eq!(engine.copy_backs.borrow().len(), 1);
        assert_eq!(
            *fx.service_log.borrow(),
            vec![ServiceAction::Stop, ServiceAction::Start]
        );

        // Snapshot of the old data directory became a catalog entry.
        let catalog = Catalog::new(&fx.cfg.backup.backup_dir, "%Y%m%d_%H%M%S");
        let snapshots = catalog
            .list(Some(BackupKind::PreRestoreSnapshot))
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].location.join("ibdata1").is_file());

        // Only the binlog capture inside the window was replayed.
        let replays = replayer.calls.borrow();
        assert_eq!(replays.len(), 1);
        let (files, start, end) = &replays[0];
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("mysql-bin.000001"));
        assert!(start.is_none());
        assert_eq!(*end, Some(at(2024, 1, 3)));

        // Working copy is gone.
        assert!(!fs::read_dir(&fx.cfg.backup.backup_dir).unwrap().any(|e| {
            e.unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(".work_")
        }));
    }

    #[test]
    fn test_failed_copy_back_still_restarts_service() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let engine = FakeEngine {
            fail_copy_back: true,
            ..Default::default()
        };
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        let err = restorer
            .restore_full(
                &fx.cfg.backup.backup_dir.join("full_20240101"),
                &RestoreOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ExternalToolFailure { .. }));
        assert_eq!(
            *fx.service_log.borrow(),
            vec![ServiceAction::Stop, ServiceAction::Start]
        );
        // Nothing was replayed after the failure.
        assert!(replayer.calls.borrow().is_empty());
    }

    #[test]
    fn test_restore_full_ignores_chain() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let engine = FakeEngine::default();
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        restorer
            .restore_full(
                &fx.cfg.backup.backup_dir.join("full_20240101"),
                &RestoreOptions::default(),
            )
            .unwrap();

        // Terminal prepare only: no incremental application.
        assert_eq!(*engine.prepares.borrow(), vec![(None, false)]);
    }

    #[test]
    fn test_restore_chain_applies_all_incrementals() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let engine = FakeEngine::default();
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        restorer
            .restore_chain(
                &fx.cfg.backup.backup_dir.join("full_20240101"),
                &RestoreOptions::default(),
            )
            .unwrap();

        let prepares = engine.prepares.borrow();
        assert_eq!(prepares.len(), 2);
        assert_eq!(prepares[0], (None, true));
    }

    #[test]
    fn test_restore_rejects_non_full_path() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let engine = FakeEngine::default();
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        let err = restorer
            .restore_full(
                &fx.cfg.backup.backup_dir.join("binlog_20240102"),
                &RestoreOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_scoped_backup_rejects_uncovered_table() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let full = fx.cfg.backup.backup_dir.join("full_20240101");
        let meta = crate::catalog::ArtifactMetadata {
            backup_type: "full".to_string(),
            timestamp: "20240101".to_string(),
            base_backup: None,
            tables: Some(vec!["shop.*".to_string()]),
            tool_version: None,
        };
        fs::write(
            full.join(crate::catalog::METADATA_FILE),
            serde_json::to_vec_pretty(&meta).unwrap(),
        )
        .unwrap();

        let engine = FakeEngine::default();
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        let covered = RestoreOptions {
            snapshot_existing: false,
            tables: Some(vec!["shop.orders".to_string()]),
        };
        restorer.restore_full(&full, &covered).unwrap();

        let uncovered = RestoreOptions {
            snapshot_existing: false,
            tables: Some(vec!["billing.invoices".to_string()]),
        };
        let err = restorer.restore_full(&full, &uncovered).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        // The scope check fires before any service disruption.
        assert_eq!(fx.service_log.borrow().len(), 2);
    }

    #[test]
    fn test_replay_binlogs_standalone() {
        let fx = fixture();
        seed_chain(&fx.cfg.backup.backup_dir);
        let engine = FakeEngine::default();
        let replayer = FakeReplayer::default();
        let restorer = Restorer::new(&fx.cfg, &engine, &replayer, &fx.services);

        restorer
            .replay_binlogs(
                &[fx.cfg.backup.backup_dir.join("binlog_20240102")],
                Some(at(2024, 1, 2)),
                Some(at(2024, 1, 3)),
                None,
            )
            .unwrap();

        let replays = replayer.calls.borrow();
        assert_eq!(replays.len(), 1);
        assert_eq!(replays[0].1, Some(at(2024, 1, 2)));
        // No physical restore happened.
        assert!(engine.copy_backs.borrow().is_empty());
        assert!(fx.service_log.borrow().is_empty());
    }
}
