//! Binary log replay: `mysqlbinlog <files> | mysql`.

use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::utils::errors::{Error, Result};

const DATETIME_ARG_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed call contract for the log-apply tool.
pub trait LogReplayer {
    fn apply(
        &self,
        files: &[PathBuf],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        tables: Option<&[String]>,
    ) -> Result<()>;
}

/// True for the server's rotated binlog files (`mysql-bin.000001` style):
/// a dot-separated all-digit suffix. The `.index` bookkeeping file and
/// anything else are excluded.
pub fn is_binlog_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, suffix)) => {
            !stem.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Collect the replayable binlog files inside the given capture
/// directories, sorted by file name — the server's own rotation order.
pub fn collect_binlog_files(capture_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in capture_dirs {
        if !dir.is_dir() {
            return Err(Error::NotFound(dir.clone()));
        }
        for child in std::fs::read_dir(dir)? {
            let child = child?;
            let path = child.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if path.is_file() && is_binlog_file(name) {
                files.push(path);
            }
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Production replayer piping `mysqlbinlog` output into the `mysql` client.
pub struct Mysqlbinlog {
    db: DatabaseConfig,
}

impl Mysqlbinlog {
    pub fn new(db: DatabaseConfig) -> Self {
        Self { db }
    }

    fn mysql_command(&self) -> Command {
        let mut cmd = Command::new("mysql");
        cmd.arg(format!("--host={}", self.db.host))
            .arg(format!("--port={}", self.db.port))
            .arg(format!("--user={}", self.db.user));
        if !self.db.password.is_empty() {
            cmd.arg(format!("--password={}", self.db.password));
        }
        cmd
    }
}

impl LogReplayer for Mysqlbinlog {
    fn apply(
        &self,
        files: &[PathBuf],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        tables: Option<&[String]>,
    ) -> Result<()> {
        if files.is_empty() {
            info!("No binary log files to apply");
            return Ok(());
        }

        let mut producer = Command::new("mysqlbinlog");
        if let Some(start) = start {
            producer.arg(format!(
                "--start-datetime={}",
                start.format(DATETIME_ARG_FORMAT)
            ));
        }
        if let Some(end) = end {
            producer.arg(format!(
                "--stop-datetime={}",
                end.format(DATETIME_ARG_FORMAT)
            ));
        }
        if let Some(databases) = tables.map(scoped_databases) {
            if !databases.is_empty() {
                producer.arg(format!("--database={}", databases.join(",")));
            }
        }
        for file in files {
            producer.arg(file);
        }

        info!(files = files.len(), ?start, ?end, "Replaying binary logs");

        let mut producer_child = producer
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure("mysqlbinlog", e))?;
        let sql_stream = producer_child
            .stdout
            .take()
            .expect("stdout was requested piped");

        let consumer_child = self
            .mysql_command()
            .stdin(Stdio::from(sql_stream))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure("mysql", e))?;

        let producer_out = producer_child
            .wait_with_output()
            .map_err(|e| spawn_failure("mysqlbinlog", e))?;
        let consumer_out = consumer_child
            .wait_with_output()
            .map_err(|e| spawn_failure("mysql", e))?;

        if !producer_out.status.success() {
            return Err(Error::ExternalToolFailure {
                tool: "mysqlbinlog".to_string(),
                status: producer_out.status.to_string(),
                stderr: String::from_utf8_lossy(&producer_out.stderr).into_owned(),
            });
        }
        if !consumer_out.status.success() {
            return Err(Error::ExternalToolFailure {
                tool: "mysql".to_string(),
                status: consumer_out.status.to_string(),
                stderr: String::from_utf8_lossy(&consumer_out.stderr).into_owned(),
            });
        }

        info!("Binary log replay completed");
        Ok(())
    }
}

fn spawn_failure(tool: &str, e: std::io::Error) -> Error {
    Error::ExternalToolFailure {
        tool: tool.to_string(),
        status: "spawn failed".to_string(),
        stderr: e.to_string(),
    }
}

/// Databases named by the table scope, deduplicated, wildcards dropped.
fn scoped_databases(tables: &[String]) -> Vec<String> {
    let mut dbs: Vec<String> = tables
        .iter()
        .filter_map(|t| t.split_once('.').map(|(db, _)| db))
        .filter(|db| *db != "*" && !db.is_empty())
        .map(|db| db.to_string())
        .collect();
    dbs.sort();
    dbs.dedup();
    dbs
}
