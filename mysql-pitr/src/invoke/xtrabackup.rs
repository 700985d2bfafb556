//! `xtrabackup` invocation: capture, prepare, and copy-back.

use std::path::Path;
use std::process::Command;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::invoke::{run_checked, BackupEngine, BackupMode, TakeBackupSpec};
use crate::utils::errors::Result;

const TOOL: &str = "xtrabackup";

/// Production backup engine shelling out to Percona XtraBackup.
pub struct Xtrabackup {
    db: DatabaseConfig,
}

impl Xtrabackup {
    pub fn new(db: DatabaseConfig) -> Self {
        Self { db }
    }

    fn auth_args(&self, cmd: &mut Command) {
        cmd.arg(format!("--host={}", self.db.host))
            .arg(format!("--port={}", self.db.port))
            .arg(format!("--user={}", self.db.user));
        if !self.db.password.is_empty() {
            cmd.arg(format!("--password={}", self.db.password));
        }
        if let Some(socket) = &self.db.socket {
            cmd.arg(format!("--socket={}", socket.display()));
        }
    }
}

impl BackupEngine for Xtrabackup {
    fn take_backup(&self, spec: &TakeBackupSpec<'_>) -> Result<()> {
        let mut cmd = Command::new(TOOL);
        cmd.arg("--backup")
            .arg(format!("--target-dir={}", spec.target_dir.display()));
        self.auth_args(&mut cmd);
        if spec.mode == BackupMode::Incremental {
            if let Some(basedir) = spec.basedir {
                cmd.arg(format!("--incremental-basedir={}", basedir.display()));
            }
        }
        if spec.compress {
            cmd.arg("--compress");
        }
        cmd.arg(format!("--parallel={}", spec.threads));
        if let Some(tables) = spec.table_scope {
            for table in tables {
                cmd.arg(format!("--tables={table}"));
            }
        }

        info!(target = %spec.target_dir.display(), mode = ?spec.mode, "Taking backup");
        run_checked(TOOL, &mut cmd)?;
        Ok(())
    }

    fn prepare(
        &self,
        target_dir: &Path,
        incremental_dir: Option<&Path>,
        log_only: bool,
        threads: u32,
    ) -> Result<()> {
        let mut cmd = Command::new(TOOL);
        cmd.arg("--prepare")
            .arg(format!("--target-dir={}", target_dir.display()));
        if let Some(inc) = incremental_dir {
            cmd.arg(format!("--incremental-dir={}", inc.display()));
        }
        if log_only {
            cmd.arg("--apply-log-only");
        }
        cmd.arg(format!("--parallel={threads}"));

        info!(
            target = %target_dir.display(),
            incremental = ?incremental_dir,
            log_only,
            "Preparing backup"
        );
        run_checked(TOOL, &mut cmd)?;
        Ok(())
    }

    fn copy_back(&self, prepared_dir: &Path, table_scope: Option<&[String]>) -> Result<()> {
        let mut cmd = Command::new(TOOL);
        cmd.arg("--copy-back")
            .arg(format!("--target-dir={}", prepared_dir.display()));
        if let Some(tables) = table_scope {
            for table in tables {
                cmd.arg(format!("--tables={table}"));
            }
        }

        info!(prepared = %prepared_dir.display(), "Copying back prepared base");
        run_checked(TOOL, &mut cmd)?;
        Ok(())
    }

    fn version(&self) -> Option<String> {
        let mut cmd = Command::new(TOOL);
        cmd.arg("--version");
        run_checked(TOOL, &mut cmd)
            .ok()
            .map(|out| out.trim().to_string())
    }
}
