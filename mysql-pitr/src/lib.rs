//! MySQL Point-in-Time Recovery Toolkit
//!
//! Physical backup lineage management on top of XtraBackup: full and
//! incremental capture, binlog archiving, chain merge, retention, and
//! point-in-time restore.

pub mod archive;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod invoke;
pub mod lock;
pub mod merge;
pub mod resolver;
pub mod restore;
pub mod retention;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::Error;
pub type Result<T> = std::result::Result<T, Error>;
