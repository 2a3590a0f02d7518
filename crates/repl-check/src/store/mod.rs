//! Checksum store: one row per chunk, per server.
//!
//! The master's store is the source of truth for chunk identity. Every server
//! writes only its own `this_crc`/`this_cnt`; `master_crc`/`master_cnt` are
//! filled in by the transfer step and never touched while hashing.

mod record;

pub use record::{Boundary, ChunkHash, ChunkRecord};

#[cfg(test)]
pub(crate) use record::tests::record as record_fixture;

use tracing::{debug, info};

use crate::core::query::{Query, StoreOp, StoreRef};
use crate::core::traits::SqlExecutor;
use crate::core::value::SqlValue;
use crate::error::Result;

/// Access to the checksum store table on any server.
#[derive(Debug, Clone)]
pub struct ChecksumStore {
    location: StoreRef,
}

impl ChecksumStore {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            location: StoreRef {
                database: database.into(),
                table: table.into(),
            },
        }
    }

    pub fn location(&self) -> &StoreRef {
        &self.location
    }

    /// Database holding the store; never indexed itself.
    pub fn database(&self) -> &str {
        &self.location.database
    }

    fn query(&self, op: StoreOp) -> Query {
        Query::Store {
            store: self.location.clone(),
            op,
        }
    }

    async fn run<E: SqlExecutor>(&self, exec: &mut E, op: StoreOp, params: Vec<SqlValue>) -> Result<u64> {
        exec.execute_query(&self.query(op), params).await
    }

    async fn records<E: SqlExecutor>(
        &self,
        exec: &mut E,
        op: StoreOp,
        params: Vec<SqlValue>,
    ) -> Result<Vec<ChunkRecord>> {
        let rows = exec.fetch_query(&self.query(op), params).await?;
        rows.iter().map(ChunkRecord::from_row).collect()
    }

    pub async fn exists<E: SqlExecutor>(&self, exec: &mut E) -> Result<bool> {
        let rows = exec
            .fetch_query(&self.query(StoreOp::TableExists), Vec::new())
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(SqlValue::as_i64)
            .unwrap_or(0)
            > 0)
    }

    /// Make sure the store exists; `force_reset` drops and recreates it.
    ///
    /// Returns true when the table was (re)created.
    pub async fn ensure<E: SqlExecutor>(&self, exec: &mut E, force_reset: bool) -> Result<bool> {
        self.run(exec, StoreOp::CreateDatabase, Vec::new()).await?;
        if force_reset {
            info!(
                "{}: resetting checksum store {}.{}",
                exec.server(),
                self.location.database,
                self.location.table
            );
            self.run(exec, StoreOp::DropTable, Vec::new()).await?;
        } else if self.exists(exec).await? {
            return Ok(false);
        }
        self.run(exec, StoreOp::CreateTable, Vec::new()).await?;
        debug!("{}: created checksum store", exec.server());
        Ok(true)
    }

    /// Forget previously transferred master values.
    pub async fn clear_master<E: SqlExecutor>(&self, exec: &mut E) -> Result<u64> {
        self.run(exec, StoreOp::ClearMaster, Vec::new()).await
    }

    /// Boundaries of one table, in chunk order.
    pub async fn load_table<E: SqlExecutor>(&self, exec: &mut E, db: &str, tbl: &str) -> Result<Vec<ChunkRecord>> {
        self.records(exec, StoreOp::LoadTable, vec![db.into(), tbl.into()])
            .await
    }

    /// Drop every chunk of one table, e.g. before re-chunking it another way.
    pub async fn delete_table<E: SqlExecutor>(&self, exec: &mut E, db: &str, tbl: &str) -> Result<u64> {
        self.run(exec, StoreOp::DeleteTable, vec![db.into(), tbl.into()])
            .await
    }

    /// Every record, ordered by db, tbl, chunk.
    pub async fn load_all<E: SqlExecutor>(&self, exec: &mut E) -> Result<Vec<ChunkRecord>> {
        self.records(exec, StoreOp::LoadAll, Vec::new()).await
    }

    /// A random batch of chunks older than `expire_days` or never hashed.
    pub async fn load_stale<E: SqlExecutor>(
        &self,
        exec: &mut E,
        expire_days: u32,
        batch: u64,
    ) -> Result<Vec<ChunkRecord>> {
        self.records(
            exec,
            StoreOp::LoadStale,
            vec![SqlValue::Int(i64::from(expire_days)), SqlValue::UInt(batch)],
        )
        .await
    }

    pub async fn load_chunk<E: SqlExecutor>(
        &self,
        exec: &mut E,
        db: &str,
        tbl: &str,
        chunk: i64,
    ) -> Result<Option<ChunkRecord>> {
        let mut records = self
            .records(
                exec,
                StoreOp::LoadChunk,
                vec![db.into(), tbl.into(), SqlValue::Int(chunk)],
            )
            .await?;
        Ok(records.pop())
    }

    /// Write a freshly computed boundary as an unhashed placeholder.
    pub async fn put_boundary<E: SqlExecutor>(&self, exec: &mut E, boundary: &Boundary) -> Result<()> {
        let params = vec![
            boundary.db.as_str().into(),
            boundary.tbl.as_str().into(),
            SqlValue::Int(boundary.chunk),
            boundary.strategy.as_str().into(),
            boundary.lower.as_str().into(),
            boundary.upper.as_str().into(),
        ];
        self.run(exec, StoreOp::PutBoundary, params).await?;
        Ok(())
    }

    /// Record this server's checksum for a chunk. Safe to repeat.
    pub async fn put_checksum<E: SqlExecutor>(
        &self,
        exec: &mut E,
        boundary: &Boundary,
        hash: &ChunkHash,
    ) -> Result<()> {
        let params = vec![
            boundary.db.as_str().into(),
            boundary.tbl.as_str().into(),
            SqlValue::Int(boundary.chunk),
            SqlValue::Float(hash.elapsed_secs),
            boundary.strategy.as_str().into(),
            boundary.lower.as_str().into(),
            boundary.upper.as_str().into(),
            hash.crc.as_str().into(),
            SqlValue::Int(hash.count),
        ];
        self.run(exec, StoreOp::PutChecksum, params).await?;
        Ok(())
    }

    /// Record the master's checksum (`master.this_*`) against a chunk.
    pub async fn put_master<E: SqlExecutor>(&self, exec: &mut E, master: &ChunkRecord) -> Result<()> {
        let params = vec![
            master.db.as_str().into(),
            master.tbl.as_str().into(),
            SqlValue::Int(master.chunk),
            master.chunk_index.as_str().into(),
            master.lower_boundary.as_str().into(),
            master.upper_boundary.as_str().into(),
            master.this_crc.as_str().into(),
            SqlValue::Int(master.this_cnt),
        ];
        self.run(exec, StoreOp::PutMaster, params).await?;
        Ok(())
    }

    /// Chunks whose local values disagree with the transferred master values.
    pub async fn divergent<E: SqlExecutor>(&self, exec: &mut E) -> Result<Vec<ChunkRecord>> {
        self.records(exec, StoreOp::Divergent, Vec::new()).await
    }

    /// Chunks hashed at least once on this server.
    pub async fn hashed<E: SqlExecutor>(&self, exec: &mut E) -> Result<Vec<ChunkRecord>> {
        self.records(exec, StoreOp::Hashed, Vec::new()).await
    }
}
