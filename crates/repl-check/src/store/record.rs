//! Checksum store records and the boundary/hash values derived from them.

use serde::{Deserialize, Serialize};

use crate::core::schema::ChunkStrategy;
use crate::core::value::{Row, SqlValue};
use crate::error::{CheckError, Result};

/// The `[lower, upper]` range of one chunk. Both ends are inclusive.
///
/// For [`ChunkStrategy::Primary`] the bounds are key values; for
/// [`ChunkStrategy::Limit`] they are row offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub db: String,
    pub tbl: String,
    pub chunk: i64,
    pub strategy: ChunkStrategy,
    pub lower: String,
    pub upper: String,
}

impl Boundary {
    pub fn table_name(&self) -> String {
        format!("{}.{}", self.db, self.tbl)
    }

    /// Bind values for a key range.
    ///
    /// Only an integer key binds as integers. Numeric-looking bounds of a text
    /// key stay text: the walk followed the collation order, so `["18", "3"]`
    /// is a valid range there and an empty one as numbers.
    pub fn range_params(&self, integer_key: bool) -> Vec<SqlValue> {
        if integer_key {
            if let (Ok(lower), Ok(upper)) = (self.lower.parse::<i64>(), self.upper.parse::<i64>()) {
                return vec![SqlValue::Int(lower), SqlValue::Int(upper)];
            }
        }
        vec![
            SqlValue::Text(self.lower.clone()),
            SqlValue::Text(self.upper.clone()),
        ]
    }

    /// `[offset, count]` for an offset window.
    pub fn window_params(&self) -> Result<Vec<SqlValue>> {
        let parse = |v: &str| {
            v.parse::<i64>().map_err(|_| {
                CheckError::Store(format!(
                    "{} chunk {}: offset boundary '{}' is not an integer",
                    self.table_name(),
                    self.chunk,
                    v
                ))
            })
        };
        let lower = parse(&self.lower)?;
        let upper = parse(&self.upper)?;
        if upper < lower {
            return Err(CheckError::Store(format!(
                "{} chunk {}: window [{}, {}] is empty",
                self.table_name(),
                self.chunk,
                lower,
                upper
            )));
        }
        Ok(vec![SqlValue::Int(lower), SqlValue::Int(upper - lower + 1)])
    }

    /// Bind values for the chunk's checksum statement.
    pub fn checksum_params(&self, integer_key: bool) -> Result<Vec<SqlValue>> {
        match self.strategy {
            ChunkStrategy::Primary => Ok(self.range_params(integer_key)),
            ChunkStrategy::Limit => self.window_params(),
        }
    }
}

/// Result of hashing one chunk on one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHash {
    pub crc: String,
    pub count: i64,
    pub elapsed_secs: f64,
}

/// One row of the checksum store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub db: String,
    pub tbl: String,
    pub chunk: i64,
    pub chunk_time: Option<f64>,
    pub chunk_index: ChunkStrategy,
    pub lower_boundary: String,
    pub upper_boundary: String,
    pub this_crc: String,
    pub this_cnt: i64,
    pub master_crc: Option<String>,
    pub master_cnt: Option<i64>,
    pub ts: Option<String>,
}

impl ChunkRecord {
    /// Decode a row selected with the store's record column list.
    pub fn from_row(row: &Row) -> Result<Self> {
        if row.len() < 12 {
            return Err(CheckError::Store(format!(
                "checksum row has {} columns, expected 12",
                row.len()
            )));
        }
        let text = |i: usize| row[i].as_text();
        let required = |i: usize, name: &str| {
            text(i).ok_or_else(|| CheckError::Store(format!("checksum row missing {}", name)))
        };

        Ok(Self {
            db: required(0, "db")?,
            tbl: required(1, "tbl")?,
            chunk: row[2]
                .as_i64()
                .ok_or_else(|| CheckError::Store("checksum row missing chunk".into()))?,
            chunk_time: row[3].as_f64(),
            chunk_index: required(4, "chunk_index")?.parse()?,
            lower_boundary: text(5).unwrap_or_default(),
            upper_boundary: text(6).unwrap_or_default(),
            this_crc: text(7).unwrap_or_default(),
            this_cnt: row[8].as_i64().unwrap_or(0),
            master_crc: text(9),
            master_cnt: row[10].as_i64(),
            ts: text(11),
        })
    }

    pub fn table_name(&self) -> String {
        format!("{}.{}", self.db, self.tbl)
    }

    pub fn boundary(&self) -> Boundary {
        Boundary {
            db: self.db.clone(),
            tbl: self.tbl.clone(),
            chunk: self.chunk,
            strategy: self.chunk_index,
            lower: self.lower_boundary.clone(),
            upper: self.upper_boundary.clone(),
        }
    }

    /// Master values are present and disagree with this server's.
    pub fn is_divergent(&self) -> bool {
        match &self.master_crc {
            Some(master) if !master.is_empty() => {
                &self.this_crc != master || Some(self.this_cnt) != self.master_cnt
            }
            _ => false,
        }
    }

    /// Offset-window chunks drift under concurrent writes; their verdicts are approximate.
    pub fn is_approximate(&self) -> bool {
        self.chunk_index == ChunkStrategy::Limit
    }
}
