//! Chunk hasher: order-independent checksum of one chunk on one server.
//!
//! Each row is reduced to `CRC32(CONCAT(QUOTE(col)...))` on the server and the
//! per-row values are summed, so the aggregate does not depend on scan order.
//! The checksum statement is prepared once per table.

mod cache;

pub use cache::{StatementCache, TableKey, TableStatements};

use std::time::Instant;

use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::catalog;
use crate::config::GeneralConfig;
use crate::core::query::{ChunkShape, Query, TableRef};
use crate::core::schema::{ChunkStrategy, TableMeta};
use crate::core::traits::SqlExecutor;
use crate::core::value::{describe_params, SqlValue};
use crate::error::{CheckError, Result};
use crate::store::{Boundary, ChecksumStore, ChunkHash};

/// Log target for timing output.
pub const PROFILING: &str = "repl_check::profiling";

/// What happened to a chunk handed to [`ChunkHasher::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum HashOutcome {
    Hashed(ChunkHash),
    /// Ignored table or a per-chunk failure that was logged.
    Skipped,
}

/// Checksum statement for the cached table.
pub struct ChecksumStatement<S> {
    strategy: ChunkStrategy,
    stmt: S,
}

/// Shape of the checksum for a table under a chunking strategy.
pub fn checksum_shape(table: &TableMeta, strategy: ChunkStrategy, record_skip: u64) -> Result<ChunkShape> {
    match strategy {
        ChunkStrategy::Primary => {
            let key = table.single_key().ok_or_else(|| {
                CheckError::unsupported(table.full_name(), "PRIMARY chunk but no single key column")
            })?;
            Ok(ChunkShape::KeyRange {
                key,
                sample: (record_skip > 0).then_some(record_skip),
            })
        }
        ChunkStrategy::Limit => {
            let keys = table.chunk_keys();
            if keys.is_empty() {
                Ok(ChunkShape::Window)
            } else {
                Ok(ChunkShape::KeyedWindow { keys })
            }
        }
    }
}

/// Hashes chunks on one server and records the results in its checksum store.
pub struct ChunkHasher<E: SqlExecutor> {
    exec: E,
    store: ChecksumStore,
    general: GeneralConfig,
    cache: StatementCache<ChecksumStatement<E::Statement>>,
    span: Span,
}

impl<E: SqlExecutor> ChunkHasher<E> {
    pub fn new(exec: E, store: ChecksumStore, general: GeneralConfig) -> Self {
        let span = info_span!("server", name = %exec.server());
        Self {
            exec,
            store,
            general,
            cache: StatementCache::new(),
            span,
        }
    }

    pub fn server(&self) -> &str {
        self.exec.server()
    }

    pub fn store(&self) -> &ChecksumStore {
        &self.store
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.exec
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn into_executor(self) -> E {
        self.exec
    }

    /// Hash a chunk and record the result.
    ///
    /// Per-chunk failures are logged and reported as [`HashOutcome::Skipped`];
    /// the chunk keeps its previous checksum until a later run. Only a lost
    /// connection is returned as an error.
    pub async fn process(&mut self, boundary: &Boundary) -> Result<HashOutcome> {
        let span = self.span.clone();
        self.process_inner(boundary).instrument(span).await
    }

    async fn process_inner(&mut self, boundary: &Boundary) -> Result<HashOutcome> {
        if self.general.is_ignored(&boundary.db, &boundary.tbl) {
            debug!("Skipping ignored table {}", boundary.table_name());
            return Ok(HashOutcome::Skipped);
        }

        let hash = match self.hash(boundary).await {
            Ok(hash) => hash,
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                error!(
                    "{} chunk {}: checksum failed, chunk skipped: {}",
                    boundary.table_name(),
                    boundary.chunk,
                    e
                );
                return Ok(HashOutcome::Skipped);
            }
        };

        match self.store.put_checksum(&mut self.exec, boundary, &hash).await {
            Ok(()) => {}
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                error!(
                    "{} chunk {}: could not record checksum: {}",
                    boundary.table_name(),
                    boundary.chunk,
                    e
                );
                return Ok(HashOutcome::Skipped);
            }
        }

        info!(
            target: PROFILING,
            table = %boundary.table_name(),
            chunk = boundary.chunk,
            rows = hash.count,
            elapsed_secs = hash.elapsed_secs,
            "chunk hashed"
        );
        Ok(HashOutcome::Hashed(hash))
    }

    /// Compute `(crc, count)` for a chunk without recording it.
    pub async fn hash(&mut self, boundary: &Boundary) -> Result<ChunkHash> {
        self.ensure_statement(boundary).await?;
        let entry = self
            .cache
            .get(&boundary.db, &boundary.tbl)
            .ok_or_else(|| CheckError::Store("checksum statement missing from cache".into()))?;
        let params = boundary.checksum_params(entry.table.integer_key())?;

        let started = Instant::now();
        let rows = match self.exec.fetch(&entry.statements.stmt, params.clone()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    "{}: checksum fetch failed\n  SQL: {}\n  Params: {}",
                    self.exec.server(),
                    self.exec.describe(&entry.statements.stmt),
                    describe_params(&params)
                );
                return Err(e);
            }
        };
        let elapsed_secs = started.elapsed().as_secs_f64();

        let row = rows.first().ok_or_else(|| {
            CheckError::Store(format!(
                "{} chunk {}: checksum returned no row",
                boundary.table_name(),
                boundary.chunk
            ))
        })?;
        let crc = row.first().and_then(SqlValue::as_text).unwrap_or_default();
        let count = row.get(1).and_then(SqlValue::as_i64).unwrap_or(0);

        Ok(ChunkHash {
            crc,
            count,
            elapsed_secs,
        })
    }

    /// Prepare the checksum statement unless the cache already holds it.
    async fn ensure_statement(&mut self, boundary: &Boundary) -> Result<()> {
        if let Some(entry) = self.cache.get(&boundary.db, &boundary.tbl) {
            if entry.statements.strategy == boundary.strategy {
                return Ok(());
            }
        }
        self.cache.invalidate();

        let table = catalog::load_table(&mut self.exec, &boundary.db, &boundary.tbl).await?;
        let shape = checksum_shape(&table, boundary.strategy, self.general.record_skip)?;
        let query = Query::ChunkChecksum {
            table: TableRef::new(&table.schema, &table.name),
            columns: table.column_names(),
            shape,
        };
        let stmt = self.exec.prepare(&query).await?;
        debug!(
            "{}: prepared checksum for {}: {}",
            self.exec.server(),
            table.full_name(),
            self.exec.describe(&stmt)
        );
        self.cache.insert(
            table,
            ChecksumStatement {
                strategy: boundary.strategy,
                stmt,
            },
        );
        Ok(())
    }
}
