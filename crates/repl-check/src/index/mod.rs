//! Boundary indexer: splits every replicated table into resumable chunks.
//!
//! Tables with a single sortable key are walked in key order, roughly one
//! page of rows per chunk, without counting or offsetting through the whole
//! table. Everything else falls back to row-offset windows sized from the
//! approximate row count.
//!
//! Each boundary is written to the checksum store as soon as its upper bound
//! is known. On restart the last persisted boundary is recomputed (it may be
//! the short tail of an earlier run) and the walk continues from there.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog;
use crate::config::GeneralConfig;
use crate::core::query::{Query, TableRef};
use crate::core::schema::{ChunkStrategy, KeyValue, TableMeta};
use crate::core::traits::SqlExecutor;
use crate::core::value::SqlValue;
use crate::error::{CheckError, Result};
use crate::store::{Boundary, ChecksumStore, ChunkRecord};

/// Rows per chunk: about a tenth of the table, kept within the block limits.
pub fn page_size(row_count: i64, min_block_size: i64, max_block_size: i64) -> i64 {
    let tenth = (row_count.max(0) + 9) / 10;
    min_block_size.max(tenth.min(max_block_size))
}

/// Totals for one indexing pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub tables: usize,
    pub boundaries: usize,
    pub failed_tables: usize,
    pub failed_databases: usize,
}

/// Computes and persists chunk boundaries on the master.
#[derive(Debug, Clone)]
pub struct Indexer {
    store: ChecksumStore,
    general: GeneralConfig,
}

impl Indexer {
    pub fn new(store: ChecksumStore, general: GeneralConfig) -> Self {
        Self { store, general }
    }

    fn page_size_for(&self, table: &TableMeta) -> i64 {
        page_size(
            table.row_count,
            self.general.min_block_size,
            self.general.max_block_size,
        )
    }

    /// Index every table of every replicated database.
    ///
    /// A failing table, or a database whose tables cannot be listed, is
    /// logged and skipped; a lost connection or a cancellation stops the pass.
    pub async fn index_all<E: SqlExecutor>(
        &self,
        exec: &mut E,
        cancel: &CancellationToken,
    ) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        let databases = catalog::replicated_databases(exec).await?;
        if databases.is_empty() {
            warn!(
                "{}: no replicated databases (Binlog_Do_DB is empty), nothing to index",
                exec.server()
            );
        }

        for db in databases {
            if db == self.store.database() {
                continue;
            }
            let tables = match catalog::list_tables(exec, &db).await {
                Ok(tables) => tables,
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => {
                    error!("Listing tables of {} failed, database skipped: {}", db, e);
                    stats.failed_databases += 1;
                    continue;
                }
            };
            for table in tables {
                if cancel.is_cancelled() {
                    return Err(CheckError::Cancelled);
                }
                if self.general.is_ignored(&db, &table.name) {
                    debug!("Skipping ignored table {}", table.full_name());
                    continue;
                }
                match self.index_one(exec, &db, &table.name, cancel).await {
                    Ok(boundaries) => {
                        stats.tables += 1;
                        stats.boundaries += boundaries.len();
                    }
                    Err(e) if e.is_connection() || matches!(e, CheckError::Cancelled) => {
                        return Err(e)
                    }
                    Err(e) => {
                        error!("Indexing {} failed: {}", table.full_name(), e);
                        stats.failed_tables += 1;
                    }
                }
            }
        }

        info!(
            "Indexed {} tables into {} chunks ({} tables, {} databases failed)",
            stats.tables, stats.boundaries, stats.failed_tables, stats.failed_databases
        );
        Ok(stats)
    }

    /// Load metadata and persisted boundaries for one table, then extend them.
    pub async fn index_one<E: SqlExecutor>(
        &self,
        exec: &mut E,
        db: &str,
        tbl: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Boundary>> {
        let table = catalog::load_table(exec, db, tbl).await?;
        let existing = self.store.load_table(exec, db, tbl).await?;
        self.index_table(exec, &table, existing, cancel).await
    }

    /// Extend `existing` to cover every current row of `table`.
    ///
    /// Returns the full boundary list in chunk order.
    pub async fn index_table<E: SqlExecutor>(
        &self,
        exec: &mut E,
        table: &TableMeta,
        existing: Vec<ChunkRecord>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Boundary>> {
        let strategy = table.strategy();
        let page = self.page_size_for(table);
        let mut known: Vec<Boundary> = existing.iter().map(ChunkRecord::boundary).collect();

        if known.iter().any(|b| b.strategy != strategy) {
            warn!(
                "{}: stored chunks use a different strategy than {}, re-indexing from chunk 0",
                table.full_name(),
                strategy
            );
            self.store
                .delete_table(exec, &table.schema, &table.name)
                .await?;
            known.clear();
        }

        let before = known.len();
        let boundaries = match strategy {
            ChunkStrategy::Primary => {
                let key = table
                    .single_key()
                    .ok_or_else(|| CheckError::boundary(table.full_name(), "no single key"))?;
                self.walk_keyed(exec, table, &key, page, known, cancel).await?
            }
            ChunkStrategy::Limit => self.walk_offsets(exec, table, page, known, cancel).await?,
        };

        info!(
            "{}: {} chunks of ~{} rows by {} (resumed after {} persisted)",
            table.full_name(),
            boundaries.len(),
            page,
            strategy,
            before.saturating_sub(1)
        );
        Ok(boundaries)
    }

    async fn walk_keyed<E: SqlExecutor>(
        &self,
        exec: &mut E,
        table: &TableMeta,
        key: &str,
        page: i64,
        mut boundaries: Vec<Boundary>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Boundary>> {
        let name = table.full_name();
        let tref = TableRef::new(&table.schema, &table.name);
        let fail = |e: CheckError| match e {
            e if e.is_connection() => e,
            e => CheckError::boundary(&name, e.to_string()),
        };

        let limits = exec
            .fetch_query(
                &Query::KeyLimits {
                    table: tref.clone(),
                    key: key.to_string(),
                },
                Vec::new(),
            )
            .await
            .map_err(&fail)?;
        let row = limits.first();
        let min = row.and_then(|r| r.first()).and_then(KeyValue::from_sql);
        let max = row.and_then(|r| r.get(1)).and_then(KeyValue::from_sql);
        let (Some(min), Some(max)) = (min, max) else {
            debug!("{}: empty, no chunks", name);
            return Ok(boundaries);
        };

        let mut lower = match boundaries.pop() {
            Some(last) => KeyValue::parse_like(&last.lower, &min),
            None => min.clone(),
        };
        let next_upper = exec
            .prepare(&Query::NextUpper {
                table: tref,
                key: key.to_string(),
            })
            .await
            .map_err(&fail)?;

        loop {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            let rows = exec
                .fetch(&next_upper, vec![lower.to_sql(), SqlValue::Int(page)])
                .await
                .map_err(&fail)?;
            let found = rows
                .first()
                .and_then(|r| r.first())
                .and_then(KeyValue::from_sql);
            // Past the last key: close the range at the global max
            let upper = found.unwrap_or_else(|| max.clone());

            let boundary = Boundary {
                db: table.schema.clone(),
                tbl: table.name.clone(),
                chunk: boundaries.len() as i64,
                strategy: ChunkStrategy::Primary,
                lower: lower.to_string(),
                upper: upper.to_string(),
            };
            self.store.put_boundary(exec, &boundary).await?;
            debug!("{} chunk {}: [{}, {}]", name, boundary.chunk, lower, upper);
            boundaries.push(boundary);

            // With at least two keys per page, no progress means lower is the last key
            if upper == lower || reached_end(&upper, &max) {
                break;
            }
            lower = upper;
        }
        Ok(boundaries)
    }

    async fn walk_offsets<E: SqlExecutor>(
        &self,
        exec: &mut E,
        table: &TableMeta,
        page: i64,
        mut boundaries: Vec<Boundary>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Boundary>> {
        boundaries.pop();
        let mut offset = boundaries.len() as i64 * page;

        while offset < table.row_count {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            let size = page.min(table.row_count - offset);
            let boundary = Boundary {
                db: table.schema.clone(),
                tbl: table.name.clone(),
                chunk: boundaries.len() as i64,
                strategy: ChunkStrategy::Limit,
                lower: offset.to_string(),
                upper: (offset + size - 1).to_string(),
            };
            self.store.put_boundary(exec, &boundary).await?;
            boundaries.push(boundary);
            offset += page;
        }
        Ok(boundaries)
    }
}

/// Integer keys compare numerically; other keys only by equality, since the
/// server's collation decides their order.
fn reached_end(upper: &KeyValue, max: &KeyValue) -> bool {
    match (upper, max) {
        (KeyValue::Int(u), KeyValue::Int(m)) => u >= m,
        _ => upper == max,
    }
}
