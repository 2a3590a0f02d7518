//! Table metadata, chunking strategy and key values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::value::SqlValue;
use crate::error::CheckError;

/// A chunking key value, or a boundary read back from the checksum store.
///
/// Boundaries are persisted as text; integer keys are recovered by parsing so
/// that range comparisons stay numeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    /// Integer key (covers tinyint through bigint).
    Int(i64),
    /// Any other sortable key, compared as text.
    Text(String),
}

impl KeyValue {
    /// Convert a fetched column value into a key, `None` for NULL.
    pub fn from_sql(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Null => None,
            SqlValue::Int(v) => Some(KeyValue::Int(*v)),
            SqlValue::UInt(v) => Some(match i64::try_from(*v) {
                Ok(i) => KeyValue::Int(i),
                Err(_) => KeyValue::Text(v.to_string()),
            }),
            other => other.as_text().map(KeyValue::Text),
        }
    }

    /// Parse stored text into a key of the same kind as `like`.
    pub fn parse_like(text: &str, like: &KeyValue) -> Self {
        match like {
            KeyValue::Int(_) => match text.parse() {
                Ok(v) => KeyValue::Int(v),
                Err(_) => KeyValue::Text(text.to_string()),
            },
            KeyValue::Text(_) => KeyValue::Text(text.to_string()),
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            KeyValue::Int(v) => SqlValue::Int(*v),
            KeyValue::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(s) => f.write_str(s),
        }
    }
}

/// How a table is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkStrategy {
    /// Closed range over a single sortable key.
    Primary,
    /// Row-offset window, for composite or missing keys.
    Limit,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Primary => "PRIMARY",
            ChunkStrategy::Limit => "LIMIT",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIMARY" => Ok(ChunkStrategy::Primary),
            "LIMIT" => Ok(ChunkStrategy::Limit),
            other => Err(CheckError::Store(format!("unknown chunk_index '{}'", other))),
        }
    }
}

/// Column metadata from `information_schema.COLUMNS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "varchar").
    pub data_type: String,

    /// Part of the primary key.
    pub is_primary: bool,

    /// Auto-increment column.
    pub is_auto_increment: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl Column {
    /// Integer column types. Keys of these types bind and compare as numbers;
    /// every other key is bound as text and ordered by the server's collation.
    pub fn is_integer(&self) -> bool {
        let base = self
            .data_type
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        matches!(
            base.as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
        )
    }
}

/// Table metadata used for chunking and hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    /// Database name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Storage engine, when reported.
    pub engine: Option<String>,

    /// Approximate row count (`TABLE_ROWS`).
    pub row_count: i64,

    /// Columns in ordinal order.
    pub columns: Vec<Column>,
}

impl TableMeta {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Key set used for chunking.
    ///
    /// A lone auto-increment column wins; otherwise the full primary key;
    /// otherwise nothing.
    pub fn chunk_keys(&self) -> Vec<String> {
        let auto: Vec<&Column> = self.columns.iter().filter(|c| c.is_auto_increment).collect();
        if auto.len() == 1 {
            return vec![auto[0].name.clone()];
        }
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect()
    }

    /// The single chunking key, if the table has exactly one.
    pub fn single_key(&self) -> Option<String> {
        let mut keys = self.chunk_keys();
        if keys.len() == 1 {
            keys.pop()
        } else {
            None
        }
    }

    /// Metadata of the single chunking key.
    pub fn key_column(&self) -> Option<&Column> {
        let key = self.single_key()?;
        self.columns.iter().find(|c| c.name == key)
    }

    /// The single chunking key has an integer type.
    pub fn integer_key(&self) -> bool {
        self.key_column().is_some_and(Column::is_integer)
    }

    pub fn strategy(&self) -> ChunkStrategy {
        if self.single_key().is_some() {
            ChunkStrategy::Primary
        } else {
            ChunkStrategy::Limit
        }
    }
}
