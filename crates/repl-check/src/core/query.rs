//! Structural description of every statement the engine issues.
//!
//! A [`Query`] names tables and columns but never carries values; those are
//! bound positionally when the prepared statement runs. Drivers turn a query
//! into SQL text (see `MysqlDialect::render`). The expected parameter layout
//! is listed on each variant.

/// A table on a checked server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

/// Location of the checksum store table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreRef {
    pub database: String,
    pub table: String,
}

/// Rows covered by a chunk checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkShape {
    /// Closed key range, params `[lower, upper]`. With `sample`, only rows
    /// whose key is a multiple of it are included.
    KeyRange { key: String, sample: Option<u64> },
    /// Key-ordered offset window joined back to the table, params `[offset, count]`.
    KeyedWindow { keys: Vec<String> },
    /// Unordered offset window, params `[offset, count]`.
    Window,
}

/// Checksum store operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// No params.
    CreateDatabase,
    /// No params.
    CreateTable,
    /// No params.
    DropTable,
    /// No params; returns one row with a count.
    TableExists,
    /// No params; nulls every `master_crc`/`master_cnt`.
    ClearMaster,
    /// `[db, tbl]`.
    LoadTable,
    /// `[db, tbl]`; removes every chunk of one table.
    DeleteTable,
    /// No params.
    LoadAll,
    /// `[expire_days, batch]`.
    LoadStale,
    /// `[db, tbl, chunk]`.
    LoadChunk,
    /// `[db, tbl, chunk, chunk_index, lower, upper]`.
    PutBoundary,
    /// `[db, tbl, chunk, chunk_time, chunk_index, lower, upper, this_crc, this_cnt]`.
    PutChecksum,
    /// `[db, tbl, chunk, chunk_index, lower, upper, master_crc, master_cnt]`.
    PutMaster,
    /// No params.
    Divergent,
    /// No params.
    Hashed,
}

/// A statement the engine can prepare on a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// No params; `Binlog_Do_DB` is the third column.
    ReplicatedDatabases,
    /// `[schema]`; rows `(name, engine, rows)`.
    ListTables,
    /// `[schema, table]`; one row `(name, engine, rows)`.
    TableInfo,
    /// `[schema, table]`; rows `(name, data_type, is_primary, is_auto_increment, ordinal)`.
    TableColumns,
    /// No params; one row `(min, max)`.
    KeyLimits { table: TableRef, key: String },
    /// `[lower, page_size]`; one row with the largest key among the first
    /// `page_size` keys at or above `lower`, NULL when there are none.
    NextUpper { table: TableRef, key: String },
    /// Shape params; one row `(crc, cnt)`.
    ChunkChecksum {
        table: TableRef,
        columns: Vec<String>,
        shape: ChunkShape,
    },
    /// `[lower, upper]`; rows `(key, row_crc)` ordered by key.
    RowHashes {
        table: TableRef,
        key: String,
        columns: Vec<String>,
        sample: Option<u64>,
    },
    /// `[key]`; the full row in `columns` order.
    ReadRow {
        table: TableRef,
        key: String,
        columns: Vec<String>,
    },
    /// One param per column.
    UpsertRow { table: TableRef, columns: Vec<String> },
    /// `[key]`.
    DeleteRow { table: TableRef, key: String },
    /// No params.
    Ping,
    /// Checksum store access.
    Store { store: StoreRef, op: StoreOp },
}

impl Query {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Query::ReplicatedDatabases => "replicated_databases",
            Query::ListTables => "list_tables",
            Query::TableInfo => "table_info",
            Query::TableColumns => "table_columns",
            Query::KeyLimits { .. } => "key_limits",
            Query::NextUpper { .. } => "next_upper",
            Query::ChunkChecksum { .. } => "chunk_checksum",
            Query::RowHashes { .. } => "row_hashes",
            Query::ReadRow { .. } => "read_row",
            Query::UpsertRow { .. } => "upsert_row",
            Query::DeleteRow { .. } => "delete_row",
            Query::Ping => "ping",
            Query::Store { .. } => "checksum_store",
        }
    }

    /// Statements the server will not accept through the binary protocol.
    pub fn requires_text_protocol(&self) -> bool {
        matches!(self, Query::ReplicatedDatabases)
    }
}
