//! Black-box collaborator invocations.
//!
//! Everything that shells out lives here: the physical backup engine
//! (`xtrabackup`), the log replay pipeline (`mysqlbinlog | mysql`), and the
//! database service control ladder. The rest of the crate talks to these
//! through the `BackupEngine` / `LogReplayer` traits so merges and restores
//! can be exercised against recording fakes.

pub mod binlog;
pub mod service;
pub mod xtrabackup;

pub use binlog::{LogReplayer, Mysqlbinlog};
pub use service::{ServiceAction, ServiceController, ServiceStrategy};
pub use xtrabackup::Xtrabackup;

use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::utils::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    Full,
    Incremental,
}

/// Arguments for one backup-capture invocation. The target directory is
/// freshly created by the caller and must not pre-exist.
#[derive(Debug)]
pub struct TakeBackupSpec<'a> {
    pub target_dir: &'a Path,
    pub mode: BackupMode,
    /// Base backup for incremental mode.
    pub basedir: Option<&'a Path>,
    pub table_scope: Option<&'a [String]>,
    pub threads: u32,
    pub compress: bool,
}

/// The physical backup engine's fixed call contract.
pub trait BackupEngine {
    fn take_backup(&self, spec: &TakeBackupSpec<'_>) -> Result<()>;

    /// Prepare a backup for restoration. `log_only` retains undo so further
    /// incrementals can still be folded in; without it the prepare is
    /// terminal and the directory is ready for copy-back.
    fn prepare(
        &self,
        target_dir: &Path,
        incremental_dir: Option<&Path>,
        log_only: bool,
        threads: u32,
    ) -> Result<()>;

    /// Write a prepared base into the live data directory.
    fn copy_back(&self, prepared_dir: &Path, table_scope: Option<&[String]>) -> Result<()>;

    /// Engine version string for metadata sidecars, if obtainable.
    fn version(&self) -> Option<String> {
        None
    }
}

/// Run a command to completion, returning stdout on success and
/// `ExternalToolFailure` with captured stderr on a non-zero exit.
pub(crate) fn run_checked(tool: &str, cmd: &mut Command) -> Result<String> {
    debug!(tool, command = ?cmd, "Invoking external tool");
    let output = cmd.output().map_err(|e| Error::ExternalToolFailure {
        tool: tool.to_string(),
        status: "spawn failed".to_string(),
        stderr: e.to_string(),
    })?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(Error::ExternalToolFailure {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
