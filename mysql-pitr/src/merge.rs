//! Chain merge engine: fold an incremental chain into a restorable base.
//!
//! A merge never touches the catalog's canonical full backup. The full is
//! copied into a disposable working directory first; prepare steps run
//! against that copy, strictly in resolver order, log-only everywhere except
//! the terminal step. Any failure aborts the whole merge and the working
//! copy is removed, so a failed merge leaves the catalog exactly as found.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive;
use crate::catalog::{Catalog, INC_SUBDIR};
use crate::invoke::BackupEngine;
use crate::lock::SubtreeLock;
use crate::resolver::Lineage;
use crate::utils::errors::{Error, Result};
use crate::utils::fsutil;

/// Progress of one merge, tracked for logging and failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Unprepared,
    PreparingFull,
    FullPrepared { log_only: bool },
    ApplyingIncrement(usize),
    IncrementPrepared(usize),
    Finalized,
}

/// A prepared, restorable base in a disposable working directory.
///
/// Removed from disk on drop — the terminal restore step consumes it while
/// the guard is alive, and both success and failure paths end in removal.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
}

impl WorkingCopy {
    /// Copy a full backup into a fresh dot-prefixed working directory under
    /// `work_root`. The chain subtree is not carried over; incrementals are
    /// applied from their catalog locations.
    fn create(work_root: &Path, full_dir: &Path) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = work_root.join(format!(".work_{stamp}_{}", std::process::id()));
        if path.exists() {
            return Err(Error::AlreadyExists(path));
        }
        fs::create_dir_all(&path)?;

        for child in fs::read_dir(full_dir)? {
            let child = child?;
            let name = child.file_name();
            if name == INC_SUBDIR {
                continue;
            }
            let src = child.path();
            let dst = path.join(&name);
            if src.is_dir() {
                fsutil::copy_tree(&src, &dst)?;
            } else {
                fs::copy(&src, &dst)?;
            }
        }

        debug!(work = %path.display(), "Created merge working copy");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(work = %self.path.display(), error = %e, "Failed to remove working copy");
            }
        }
    }
}

/// Runs chain merges against a backup engine.
pub struct ChainMerge<'a> {
    engine: &'a dyn BackupEngine,
    threads: u32,
}

impl<'a> ChainMerge<'a> {
    pub fn new(engine: &'a dyn BackupEngine, threads: u32) -> Self {
        Self { engine, threads }
    }

    /// Materialize a restorable base from the lineage's full backup and
    /// incremental chain. Binlogs are not this engine's concern.
    ///
    /// Step indices in `ChainMergeFailed`: step 0 is the full prepare,
    /// step i (1-based) is the i-th incremental.
    pub fn run(&self, catalog: &Catalog, lineage: &Lineage) -> Result<WorkingCopy> {
        let full_dir = lineage.full.unpacked_location();
        if !full_dir.is_dir() {
            return Err(Error::NotFound(full_dir));
        }

        // A retention sweep must not evict this subtree mid-merge.
        let _lock = SubtreeLock::acquire(catalog.root(), lineage.full.name())?;

        let mut state = MergeState::Unprepared;
        debug!(?state, full = %lineage.full.name(), "Merge started");
        let work = WorkingCopy::create(catalog.root(), &full_dir)?;
        let total = lineage.incrementals.len();

        // Log-only iff at least one incremental remains to be folded in.
        let full_log_only = total > 0;
        state = MergeState::PreparingFull;
        debug!(?state, "Merge step");
        self.engine
            .prepare(work.path(), None, full_log_only, self.threads)
            .map_err(|e| step_failure(0, e))?;
        state = MergeState::FullPrepared {
            log_only: full_log_only,
        };
        debug!(?state, "Merge step");

        for (i, inc) in lineage.incrementals.iter().enumerate() {
            let step = i + 1;
            state = MergeState::ApplyingIncrement(step);
            debug!(?state, increment = %inc.name(), "Merge step");

            let inc_dir = if inc.packed {
                archive::unpack(&inc.location).map_err(|e| step_failure(step, e))?
            } else {
                inc.location.clone()
            };

            // Every incremental except the last stays log-only.
            let log_only = step < total;
            self.engine
                .prepare(work.path(), Some(&inc_dir), log_only, self.threads)
                .map_err(|e| step_failure(step, e))?;
            state = MergeState::IncrementPrepared(step);
            debug!(?state, "Merge step");
        }

        state = MergeState::Finalized;
        info!(
            ?state,
            full = %lineage.full.name(),
            incrementals = total,
            work = %work.path().display(),
            "Chain merge finalized"
        );
        Ok(work)
    }
}

fn step_failure(step: usize, source: Error) -> Error {
    Error::ChainMergeFailed {
        step,
        source: Box::new(source),
    }
}
