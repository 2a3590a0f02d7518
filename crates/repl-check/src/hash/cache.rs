//! Per-table prepared statement cache.
//!
//! Statements are prepared once per table and reused for every chunk of that
//! table. Only the current table is kept: switching tables replaces the entry.

use sha2::{Digest, Sha256};

use crate::core::schema::TableMeta;

/// Identity of the table a cached statement set was prepared for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey(String);

impl TableKey {
    pub fn new(db: &str, tbl: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(db.as_bytes());
        hasher.update([0u8]);
        hasher.update(tbl.as_bytes());
        TableKey(format!("{:x}", hasher.finalize()))
    }
}

/// Statements prepared for one table.
#[derive(Debug)]
pub struct TableStatements<S> {
    pub key: TableKey,
    pub table: TableMeta,
    pub statements: S,
}

/// Holds the statements of the table currently being processed.
#[derive(Debug)]
pub struct StatementCache<S> {
    current: Option<TableStatements<S>>,
}

impl<S> Default for StatementCache<S> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<S> StatementCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry, if it belongs to `db.tbl`.
    pub fn get(&self, db: &str, tbl: &str) -> Option<&TableStatements<S>> {
        let key = TableKey::new(db, tbl);
        self.current.as_ref().filter(|entry| entry.key == key)
    }

    /// Replace the cached entry with statements for `table`.
    pub fn insert(&mut self, table: TableMeta, statements: S) -> &TableStatements<S> {
        let key = TableKey::new(&table.schema, &table.name);
        self.current.insert(TableStatements {
            key,
            table,
            statements,
        })
    }

    pub fn invalidate(&mut self) {
        self.current = None;
    }
}
