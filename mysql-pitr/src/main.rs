//! mysql-pitr - Main entry point
//!
//! Physical MySQL backups with incremental chains, binlog archiving, and
//! point-in-time restore.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Args as ClapArgs, Parser, Subcommand};
use mysql_pitr::catalog::{BackupKind, Catalog};
use mysql_pitr::config::Config;
use mysql_pitr::invoke::{Mysqlbinlog, ServiceController, Xtrabackup};
use mysql_pitr::restore::{RestoreOptions, Restorer};
use mysql_pitr::retention::{self, RetentionPolicy};
use mysql_pitr::utils::fsutil;
use mysql_pitr::{archive, capture, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a backup
    Backup {
        #[command(subcommand)]
        kind: BackupCommand,
    },
    /// List catalog entries
    List {
        /// Only show entries of this kind
        #[arg(long, value_enum)]
        kind: Option<BackupKind>,
    },
    /// Delete backups older than the retention window
    Clean {
        /// Override the configured retention window, in days
        #[arg(long)]
        days: Option<i64>,

        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Compress a backup directory into a .tar.gz archive
    Pack {
        /// Backup directory to compress
        path: PathBuf,
    },
    /// Expand a .tar.gz archive back into a backup directory
    Unpack {
        /// Archive to expand
        path: PathBuf,
    },
    /// Restore backups into the live data directory
    Restore {
        #[command(subcommand)]
        kind: RestoreCommand,
    },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Full physical backup
    Full {
        /// Comma-separated table patterns (db.table, supports db.*)
        #[arg(long)]
        tables: Option<String>,

        /// Skip the post-backup retention sweep
        #[arg(long)]
        no_clean: bool,
    },
    /// Incremental backup on top of an existing base
    Incremental {
        /// Base backup directory; defaults to the newest full backup
        #[arg(long)]
        base: Option<PathBuf>,

        /// Comma-separated table patterns (db.table, supports db.*)
        #[arg(long)]
        tables: Option<String>,

        /// Skip the post-backup retention sweep
        #[arg(long)]
        no_clean: bool,
    },
    /// Archive the server's current binary logs
    Binlog {
        /// Skip the post-backup retention sweep
        #[arg(long)]
        no_clean: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RestoreCommand {
    /// Restore a single full backup, ignoring its incremental chain
    Full {
        /// Full backup directory or archive
        path: PathBuf,

        #[command(flatten)]
        common: RestoreArgs,
    },
    /// Restore a full backup plus its entire incremental chain
    Chain {
        /// Full backup directory or archive
        path: PathBuf,

        #[command(flatten)]
        common: RestoreArgs,
    },
    /// Point-in-time recovery to a target timestamp
    Pitr {
        /// Target timestamp (YYYY-MM-DD or "YYYY-MM-DD HH:MM:SS")
        #[arg(long)]
        end: String,

        /// Replay binlogs starting from this timestamp instead of the
        /// full backup's
        #[arg(long)]
        start: Option<String>,

        #[command(flatten)]
        common: RestoreArgs,
    },
    /// Replay archived binlogs against the running server
    Binlog {
        /// Binlog capture directories or archives
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Replay events from this timestamp
        #[arg(long)]
        start: Option<String>,

        /// Replay events up to this timestamp
        #[arg(long)]
        end: Option<String>,

        /// Comma-separated table patterns to replay
        #[arg(long)]
        tables: Option<String>,

        /// Proceed without confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct RestoreArgs {
    /// Proceed without confirmation
    #[arg(long)]
    yes: bool,

    /// Skip the pre-restore snapshot of the existing data directory
    #[arg(long)]
    skip_snapshot: bool,

    /// Comma-separated table patterns to restore
    #[arg(long)]
    tables: Option<String>,
}

impl RestoreArgs {
    fn confirm(&self) -> Result<()> {
        if !self.yes {
            bail!("restore overwrites the live data directory; pass --yes to proceed");
        }
        Ok(())
    }

    fn options(&self) -> RestoreOptions {
        RestoreOptions {
            snapshot_existing: !self.skip_snapshot,
            tables: self.tables.as_deref().map(fsutil::parse_table_filter),
        }
    }
}

/// Accepts a bare date or a date with seconds-precision time.
fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ts);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }
    bail!("invalid timestamp '{value}', expected YYYY-MM-DD or \"YYYY-MM-DD HH:MM:SS\"")
}

fn table_filter(tables: Option<&str>) -> Option<Vec<String>> {
    tables.map(fsutil::parse_table_filter)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Initialize logging, mirrored into the backup root's operations log
    let log_level = args.log_level.as_deref().unwrap_or("info");
    utils::logger::init(log_level, Some(&config.backup.backup_dir))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backup_dir = %config.backup.backup_dir.display(),
        "Starting mysql-pitr"
    );

    let catalog = Catalog::new(&config.backup.backup_dir, &config.backup.timestamp_format);
    let engine = Xtrabackup::new(config.database.clone());

    match args.command {
        Command::Backup { kind } => {
            let no_clean = match kind {
                BackupCommand::Full { tables, no_clean } => {
                    let filter = table_filter(tables.as_deref());
                    let path = capture::capture_full(&config, &engine, filter.as_deref())?;
                    println!("{}", path.display());
                    no_clean
                }
                BackupCommand::Incremental {
                    base,
                    tables,
                    no_clean,
                } => {
                    let base = match base {
                        Some(path) => path,
                        None => catalog.latest_full()?.unpacked_location(),
                    };
                    let filter = table_filter(tables.as_deref());
                    let path =
                        capture::capture_incremental(&config, &engine, &base, filter.as_deref())?;
                    println!("{}", path.display());
                    no_clean
                }
                BackupCommand::Binlog { no_clean } => {
                    let path = capture::capture_binlog(&config)?;
                    println!("{}", path.display());
                    no_clean
                }
            };
            // Every capture ends with a retention sweep unless suppressed.
            if !no_clean {
                let policy = RetentionPolicy {
                    max_age_days: config.backup.retention_days,
                };
                retention::sweep(&catalog, policy, false, Local::now().naive_local())?;
            }
        }
        Command::List { kind } => {
            for entry in catalog.list(kind)? {
                let size = fsutil::format_size(fsutil::dir_size(&entry.location));
                let packed = if entry.packed { " (packed)" } else { "" };
                println!(
                    "{:<12} {:<19} {:>10}  {}{}",
                    entry.kind.to_string(),
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    size,
                    entry.location.display(),
                    packed
                );
            }
        }
        Command::Clean { days, dry_run } => {
            let policy = RetentionPolicy {
                max_age_days: days.unwrap_or(config.backup.retention_days),
            };
            let reaped = retention::sweep(&catalog, policy, dry_run, Local::now().naive_local())?;
            for item in &reaped {
                println!("{:?} {}", item.action, item.entry.location.display());
            }
            if reaped.is_empty() {
                println!("nothing older than {} days", policy.max_age_days);
            }
        }
        Command::Pack { path } => {
            let archive = archive::pack(&path)?;
            println!("{}", archive.display());
        }
        Command::Unpack { path } => {
            let dir = archive::unpack(&path)?;
            println!("{}", dir.display());
        }
        Command::Restore { kind } => {
            let replayer = Mysqlbinlog::new(config.database.clone());
            let services = ServiceController::new(config.service.name.clone());
            let restorer = Restorer::new(&config, &engine, &replayer, &services);
            match kind {
                RestoreCommand::Full { path, common } => {
                    common.confirm()?;
                    restorer.restore_full(&path, &common.options())?;
                }
                RestoreCommand::Chain { path, common } => {
                    common.confirm()?;
                    restorer.restore_chain(&path, &common.options())?;
                }
                RestoreCommand::Pitr { end, start, common } => {
                    common.confirm()?;
                    let end = parse_timestamp(&end)?;
                    let start = start.as_deref().map(parse_timestamp).transpose()?;
                    restorer.restore_point_in_time(start, end, &common.options())?;
                }
                RestoreCommand::Binlog {
                    paths,
                    start,
                    end,
                    tables,
                    yes,
                } => {
                    if !yes {
                        bail!("binlog replay mutates the live database; pass --yes to proceed");
                    }
                    let start = start.as_deref().map(parse_timestamp).transpose()?;
                    let end = end.as_deref().map(parse_timestamp).transpose()?;
                    let filter = table_filter(tables.as_deref());
                    restorer.replay_binlogs(&paths, start, end, filter.as_deref())?;
                }
            }
            println!("restore complete");
        }
    }

    Ok(())
}
