//! Configuration management.
//!
//! Loads configuration from a TOML file; every field has a sensible default
//! so a missing file yields a workable local setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub binlog: BinlogConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// MySQL server host
    #[serde(default = "default_host")]
    pub host: String,

    /// MySQL server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection user
    #[serde(default = "default_user")]
    pub user: String,

    /// Connection password (empty = none)
    #[serde(default)]
    pub password: String,

    /// Unix socket path, preferred over TCP when set
    #[serde(default)]
    pub socket: Option<PathBuf>,

    /// Live data directory written by copy-back
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory holding all backup artifacts
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Retention window in days
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// strftime format for artifact timestamps; must sort chronologically
    /// as a plain string
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,

    /// Parallel worker count passed to the backup engine
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Ask the backup engine to compress pages while capturing
    #[serde(default = "default_compress")]
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogConfig {
    /// Directory the server writes binary logs to
    #[serde(default = "default_binlog_dir")]
    pub binlog_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service unit / container name used by the stop/start ladder
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Owner applied to the data directory after copy-back
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_datadir() -> PathBuf {
    PathBuf::from("/var/lib/mysql")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/backups/mysql")
}

fn default_retention_days() -> i64 {
    365
}

fn default_timestamp_format() -> String {
    "%Y%m%d_%H%M%S".to_string()
}

fn default_threads() -> u32 {
    4
}

fn default_compress() -> bool {
    true
}

fn default_binlog_dir() -> PathBuf {
    PathBuf::from("/var/log/mysql")
}

fn default_service_name() -> String {
    "mysql".to_string()
}

fn default_owner() -> String {
    "mysql:mysql".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            socket: None,
            datadir: default_datadir(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            retention_days: default_retention_days(),
            timestamp_format: default_timestamp_format(),
            threads: default_threads(),
            compress: default_compress(),
        }
    }
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self {
            binlog_dir: default_binlog_dir(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            owner: default_owner(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
