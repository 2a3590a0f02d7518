//! # repl-check
//!
//! Chunked checksum verification and row-level repair for MySQL replicas.
//!
//! Tables are split into resumable chunks on the master, each chunk is
//! hashed with an order-independent server-side checksum on the master and
//! every replica, and the results are compared per chunk:
//!
//! - **Indexing** by key ranges, or offset windows for tables without a single key
//! - **Hashing** on all servers concurrently, one ordered connection per server
//! - **Reports** as text tables on stdout or by mail
//! - **Repair** of divergent keyed chunks by row-hash diff and upsert/delete
//! - **Resume** from the persisted checksum store after an interrupted run
//!
//! ## Example
//!
//! ```rust,no_run
//! use repl_check::{Checker, Config, MysqlConnector, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> repl_check::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let checker = Checker::new(config, MysqlConnector);
//!     let summary = checker
//!         .run(&RunOptions::default(), CancellationToken::new())
//!         .await?;
//!     println!("{} chunks hashed", summary.chunks_hashed);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod hash;
pub mod index;
pub mod lock;
pub mod orchestrator;
pub mod report;
pub mod store;
pub mod sync;
pub mod transfer;

// Re-exports for convenient access
pub use config::{Config, DsnConfig, GeneralConfig};
pub use self::core::{Connector, KeyValue, Query, SqlExecutor, SqlValue};
pub use drivers::{MysqlConnector, MysqlExecutor};
pub use error::{CheckError, Result};
pub use hash::{ChunkHasher, HashOutcome};
pub use index::{IndexStats, Indexer};
pub use lock::ProcessLock;
pub use orchestrator::{BoundarySelector, Checker, Phases, RunOptions, RunSummary};
pub use report::{Notifier, PrintNotifier, Report, SendmailNotifier};
pub use store::{Boundary, ChecksumStore, ChunkRecord};
pub use sync::{Reconciler, SyncAction, SyncStats};
pub use transfer::{publish_master_results, TransferStats};
