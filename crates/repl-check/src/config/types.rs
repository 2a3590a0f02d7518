//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine behavior shared by every phase.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Master server connection.
    pub master: DsnConfig,

    /// Replica server connections, one per replica.
    #[serde(default)]
    pub slaves: Vec<DsnConfig>,
}

impl Config {
    /// `db.table` entries that must never be indexed, hashed or synced.
    pub fn is_ignored(&self, db: &str, table: &str) -> bool {
        self.general.is_ignored(db, table)
    }
}

/// Engine options (`general` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Smallest chunk in rows (default: 1000).
    #[serde(default = "default_min_block_size")]
    pub min_block_size: i64,

    /// Largest chunk in rows (default: 1000000).
    #[serde(default = "default_max_block_size")]
    pub max_block_size: i64,

    /// Hash only rows whose key is a multiple of this value; 0 hashes every row.
    #[serde(default)]
    pub record_skip: u64,

    /// Tables excluded from every phase, as `db.table`.
    #[serde(default)]
    pub ignore_tables: Vec<String>,

    /// Drop and recreate the checksum store before indexing.
    #[serde(default)]
    pub force_reset: bool,

    /// Re-hash only a random batch of stale chunks instead of every chunk.
    #[serde(default)]
    pub incremental_check: bool,

    /// Chunks re-hashed per incremental run (default: 100).
    #[serde(default = "default_incremental_batchsize")]
    pub incremental_batchsize: u64,

    /// Age in days after which a chunk counts as stale (default: 1).
    #[serde(default = "default_expire_days")]
    pub expire_days: u32,

    /// Database holding the checksum store (default: "percona").
    #[serde(default = "default_database")]
    pub database: String,

    /// Checksum store table (default: "checksums").
    #[serde(default = "default_table")]
    pub table: String,

    /// Report recipient; empty disables mail delivery.
    #[serde(default)]
    pub email_report: String,

    /// Print the divergence report to stdout.
    #[serde(default)]
    pub print_results: bool,

    /// PID lock file (default: `<tmp>/repl-check.pid`).
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            min_block_size: default_min_block_size(),
            max_block_size: default_max_block_size(),
            record_skip: 0,
            ignore_tables: Vec::new(),
            force_reset: false,
            incremental_check: false,
            incremental_batchsize: default_incremental_batchsize(),
            expire_days: default_expire_days(),
            database: default_database(),
            table: default_table(),
            email_report: String::new(),
            print_results: false,
            lock_file: default_lock_file(),
        }
    }
}

impl GeneralConfig {
    /// True when `db.table` is listed in `ignore_tables`.
    pub fn is_ignored(&self, db: &str, table: &str) -> bool {
        self.ignore_tables.iter().any(|entry| {
            entry
                .split_once('.')
                .map(|(d, t)| d == db && t == table)
                .unwrap_or(false)
        })
    }
}

/// Server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DsnConfig {
    /// Display name used in logs and reports (default: host:port).
    #[serde(default)]
    pub name: Option<String>,

    /// Server host.
    pub host: String,

    /// Server port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Extra session statements run after connecting, e.g. `SET SESSION sql_mode = ''`.
    #[serde(default)]
    pub options: Vec<String>,

    /// Session `wait_timeout` in seconds (default: 15).
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u32,
}

impl DsnConfig {
    /// Name shown in logs and reports.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }
}

impl fmt::Debug for DsnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsnConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("options", &self.options)
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

fn default_min_block_size() -> i64 {
    1000
}

fn default_max_block_size() -> i64 {
    1_000_000
}

fn default_incremental_batchsize() -> u64 {
    100
}

fn default_expire_days() -> u32 {
    1
}

fn default_database() -> String {
    "percona".to_string()
}

fn default_table() -> String {
    "checksums".to_string()
}

fn default_lock_file() -> PathBuf {
    std::env::temp_dir().join("repl-check.pid")
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_wait_timeout() -> u32 {
    15
}
