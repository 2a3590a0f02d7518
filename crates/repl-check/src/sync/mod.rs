//! Row-level reconciliation of divergent chunks.
//!
//! For a divergent keyed chunk, per-row hashes are fetched from master and
//! replica over the chunk's key range, diffed in memory, and the replica is
//! repaired row by row: extra rows deleted, missing or changed rows copied
//! from master with an upsert. Afterwards the replica's chunk checksum is
//! recomputed.
//!
//! Offset-window chunks and tables without exactly one key column have no
//! repair path and are skipped with a log entry.

mod diff;

pub use diff::{diff_row_hashes, RowHashes, SyncAction};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Instrument};

use crate::catalog;
use crate::config::GeneralConfig;
use crate::core::query::{Query, TableRef};
use crate::core::schema::{ChunkStrategy, KeyValue};
use crate::core::traits::SqlExecutor;
use crate::core::value::{describe_params, SqlValue};
use crate::error::{CheckError, Result};
use crate::hash::{ChunkHasher, HashOutcome, StatementCache};
use crate::store::{Boundary, ChunkRecord};

/// Repair totals for one replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub chunks: usize,
    pub deleted: usize,
    pub upserted: usize,
    pub failed: usize,
    pub skipped_chunks: usize,
}

impl SyncStats {
    pub fn merge(&mut self, other: &SyncStats) {
        self.chunks += other.chunks;
        self.deleted += other.deleted;
        self.upserted += other.upserted;
        self.failed += other.failed;
        self.skipped_chunks += other.skipped_chunks;
    }
}

/// Statements for repairing one table.
struct SyncStatements<S> {
    master_hashes: S,
    replica_hashes: S,
    read_row: S,
    upsert_row: S,
    delete_row: S,
}

enum TablePlan<S> {
    Ready(SyncStatements<S>),
    /// Logged once; later chunks of the table are skipped quietly.
    Unsupported,
}

/// Repairs one replica from the master.
pub struct Reconciler<E: SqlExecutor> {
    master: E,
    replica: ChunkHasher<E>,
    general: GeneralConfig,
    dry_run: bool,
    cache: StatementCache<TablePlan<E::Statement>>,
    stats: SyncStats,
}

impl<E: SqlExecutor> Reconciler<E> {
    /// `replica` hashes the repaired chunks; its executor applies the repairs.
    pub fn new(master: E, replica: ChunkHasher<E>, general: GeneralConfig, dry_run: bool) -> Self {
        Self {
            master,
            replica,
            general,
            dry_run,
            cache: StatementCache::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Give back the master executor and the replica hasher.
    pub fn into_parts(self) -> (E, ChunkHasher<E>, SyncStats) {
        (self.master, self.replica, self.stats)
    }

    /// Repair every chunk in `records` (normally the replica's divergent list).
    pub async fn reconcile_all(&mut self, records: &[ChunkRecord]) -> Result<SyncStats> {
        for record in records {
            self.reconcile_chunk(record).await?;
        }
        info!(
            "{}: {} chunks reconciled, {} rows deleted, {} upserted, {} failed, {} chunks skipped",
            self.replica.server(),
            self.stats.chunks,
            self.stats.deleted,
            self.stats.upserted,
            self.stats.failed,
            self.stats.skipped_chunks
        );
        Ok(self.stats.clone())
    }

    /// Repair one chunk. Returns the actions that were computed for it.
    pub async fn reconcile_chunk(&mut self, record: &ChunkRecord) -> Result<Vec<SyncAction>> {
        let span = self.replica.span().clone();
        self.reconcile_inner(record).instrument(span).await
    }

    async fn reconcile_inner(&mut self, record: &ChunkRecord) -> Result<Vec<SyncAction>> {
        let table = record.table_name();
        if self.general.is_ignored(&record.db, &record.tbl) {
            debug!("Skipping ignored table {}", table);
            return Ok(Vec::new());
        }
        if record.chunk_index == ChunkStrategy::Limit {
            info!(
                "{} chunk {}: offset-window chunk has no row-level repair, skipped",
                table, record.chunk
            );
            self.stats.skipped_chunks += 1;
            return Ok(Vec::new());
        }

        match self.ensure_plan(record).await {
            Ok(true) => {}
            Ok(false) => {
                self.stats.skipped_chunks += 1;
                return Ok(Vec::new());
            }
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                error!("{} chunk {}: cannot prepare repair: {}", table, record.chunk, e);
                self.stats.skipped_chunks += 1;
                return Ok(Vec::new());
            }
        }

        let boundary = record.boundary();
        let (master_rows, replica_rows) = match self.fetch_hashes(&boundary).await {
            Ok(maps) => maps,
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                error!("{} chunk {}: row hash fetch failed, chunk skipped: {}", table, record.chunk, e);
                self.stats.skipped_chunks += 1;
                return Ok(Vec::new());
            }
        };

        let actions = diff_row_hashes(&master_rows, &replica_rows);
        info!(
            "{} chunk {}: {} master rows, {} replica rows, {} actions",
            table,
            record.chunk,
            master_rows.len(),
            replica_rows.len(),
            actions.len()
        );

        for action in &actions {
            self.apply(&boundary, action).await?;
            self.master.ping().await?;
        }
        self.stats.chunks += 1;

        // Rehash even with no actions: a stale stored checksum also reads as divergent
        if !self.dry_run {
            if let HashOutcome::Skipped = self.replica.process(&boundary).await? {
                warn!("{} chunk {}: re-hash after repair was skipped", table, record.chunk);
            }
        }
        Ok(actions)
    }

    /// Prepare statements for the record's table. False when the table is unsupported.
    async fn ensure_plan(&mut self, record: &ChunkRecord) -> Result<bool> {
        if let Some(entry) = self.cache.get(&record.db, &record.tbl) {
            return Ok(matches!(entry.statements, TablePlan::Ready(_)));
        }
        self.cache.invalidate();

        let table = catalog::load_table(&mut self.master, &record.db, &record.tbl).await?;
        let Some(key) = table.single_key() else {
            let err = CheckError::unsupported(
                table.full_name(),
                format!(
                    "row repair needs exactly one key column, found {:?}",
                    table.chunk_keys()
                ),
            );
            error!("{}", err);
            self.cache.insert(table, TablePlan::Unsupported);
            return Ok(false);
        };

        let tref = TableRef::new(&table.schema, &table.name);
        let columns = table.column_names();
        let sample = (self.general.record_skip > 0).then_some(self.general.record_skip);
        let hashes = Query::RowHashes {
            table: tref.clone(),
            key: key.clone(),
            columns: columns.clone(),
            sample,
        };
        let replica = self.replica.executor_mut();
        let statements = SyncStatements {
            master_hashes: self.master.prepare(&hashes).await?,
            read_row: self
                .master
                .prepare(&Query::ReadRow {
                    table: tref.clone(),
                    key: key.clone(),
                    columns: columns.clone(),
                })
                .await?,
            replica_hashes: replica.prepare(&hashes).await?,
            upsert_row: replica
                .prepare(&Query::UpsertRow {
                    table: tref.clone(),
                    columns,
                })
                .await?,
            delete_row: replica.prepare(&Query::DeleteRow { table: tref, key }).await?,
        };
        self.cache.insert(table, TablePlan::Ready(statements));
        Ok(true)
    }

    async fn fetch_hashes(&mut self, boundary: &Boundary) -> Result<(RowHashes, RowHashes)> {
        let (statements, params) = match self.cache.get(&boundary.db, &boundary.tbl) {
            Some(entry) => match &entry.statements {
                TablePlan::Ready(statements) => {
                    (statements, boundary.range_params(entry.table.integer_key()))
                }
                TablePlan::Unsupported => return Err(self.missing(boundary)),
            },
            None => return Err(self.missing(boundary)),
        };
        let master_rows = self
            .master
            .fetch(&statements.master_hashes, params.clone())
            .await?;
        let replica_rows = self
            .replica
            .executor_mut()
            .fetch(&statements.replica_hashes, params)
            .await?;
        Ok((to_hashes(master_rows), to_hashes(replica_rows)))
    }

    /// Apply one action; failures are logged and counted, never propagated
    /// unless the connection is gone.
    async fn apply(&mut self, boundary: &Boundary, action: &SyncAction) -> Result<()> {
        let outcome = match action {
            SyncAction::Delete(key) => self.delete(boundary, key).await,
            SyncAction::Upsert(key) => self.upsert(boundary, key).await,
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection() => Err(e),
            Err(e) => {
                error!(
                    "{} key {}: {:?} failed: {}",
                    boundary.table_name(),
                    action.key(),
                    action,
                    e
                );
                self.stats.failed += 1;
                Ok(())
            }
        }
    }

    async fn delete(&mut self, boundary: &Boundary, key: &KeyValue) -> Result<()> {
        let dry_run = self.dry_run;
        let statements = match self.cache.get(&boundary.db, &boundary.tbl).map(|e| &e.statements) {
            Some(TablePlan::Ready(statements)) => statements,
            _ => return Err(self.missing(boundary)),
        };
        let replica = self.replica.executor_mut();
        if dry_run {
            info!(
                "[dry-run] {}: {} -- key {}",
                replica.server(),
                replica.describe(&statements.delete_row),
                key
            );
        } else {
            replica.execute(&statements.delete_row, vec![key.to_sql()]).await?;
        }
        self.stats.deleted += 1;
        Ok(())
    }

    async fn upsert(&mut self, boundary: &Boundary, key: &KeyValue) -> Result<()> {
        let dry_run = self.dry_run;
        let statements = match self.cache.get(&boundary.db, &boundary.tbl).map(|e| &e.statements) {
            Some(TablePlan::Ready(statements)) => statements,
            _ => return Err(self.missing(boundary)),
        };

        let rows = self.master.fetch(&statements.read_row, vec![key.to_sql()]).await?;
        let Some(row) = rows.into_iter().next() else {
            // Deleted on master since the hashes were read
            debug!("{} key {}: gone from master, nothing to copy", boundary.table_name(), key);
            return Ok(());
        };

        let replica = self.replica.executor_mut();
        if dry_run {
            info!(
                "[dry-run] {}: {} -- {}",
                replica.server(),
                replica.describe(&statements.upsert_row),
                describe_params(&row)
            );
        } else {
            replica.execute(&statements.upsert_row, row).await?;
        }
        self.stats.upserted += 1;
        Ok(())
    }

    fn missing(&self, boundary: &Boundary) -> CheckError {
        CheckError::Store(format!(
            "no repair statements cached for {}",
            boundary.table_name()
        ))
    }
}

fn to_hashes(rows: Vec<Vec<SqlValue>>) -> RowHashes {
    rows.into_iter()
        .filter_map(|row| {
            let key = row.first().and_then(KeyValue::from_sql)?;
            let hash = row.get(1).and_then(SqlValue::as_text).unwrap_or_default();
            Some((key, hash))
        })
        .collect()
}
