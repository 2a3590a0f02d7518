//! MySQL SQL text for every [`Query`].
//!
//! This is the only place SQL is assembled. Identifiers go through
//! [`quote_mysql`]/[`qualify_mysql`]; values are always `?` placeholders.

use crate::core::identifier::{qualify_mysql, quote_columns, quote_mysql};
use crate::core::query::{ChunkShape, Query, StoreOp, StoreRef, TableRef};
use crate::error::Result;

/// Columns of a checksum store record, in the order rows are decoded.
pub const RECORD_COLUMNS: &str = "db, tbl, chunk, chunk_time, chunk_index, lower_boundary, \
     upper_boundary, this_crc, this_cnt, master_crc, master_cnt, \
     DATE_FORMAT(ts, '%Y-%m-%d %H:%i:%s') AS ts";

/// MySQL 5.7+ / 8.0 / MariaDB 10.2+ dialect.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Render a query to SQL text.
    pub fn render(&self, query: &Query) -> Result<String> {
        match query {
            Query::ReplicatedDatabases => Ok("SHOW MASTER STATUS".to_string()),
            Query::ListTables => Ok(
                "SELECT CAST(TABLE_NAME AS CHAR(64)), CAST(ENGINE AS CHAR(64)), TABLE_ROWS \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME"
                    .to_string(),
            ),
            Query::TableInfo => Ok(
                "SELECT CAST(TABLE_NAME AS CHAR(64)), CAST(ENGINE AS CHAR(64)), TABLE_ROWS \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?"
                    .to_string(),
            ),
            Query::TableColumns => Ok(
                "SELECT CAST(COLUMN_NAME AS CHAR(64)), CAST(DATA_TYPE AS CHAR(64)), \
                 IF(COLUMN_KEY = 'PRI', 1, 0) AS is_primary, \
                 IF(EXTRA LIKE '%auto_increment%', 1, 0) AS is_auto_increment, \
                 ORDINAL_POSITION \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION"
                    .to_string(),
            ),
            Query::KeyLimits { table, key } => {
                let key = quote_mysql(key)?;
                Ok(format!(
                    "SELECT MIN({key}), MAX({key}) FROM {}",
                    qualify(table)?
                ))
            }
            Query::NextUpper { table, key } => {
                let key = quote_mysql(key)?;
                Ok(format!(
                    "SELECT MAX(x.k) FROM (SELECT {key} AS k FROM {} \
                     WHERE {key} >= ? ORDER BY {key} LIMIT ?) x",
                    qualify(table)?
                ))
            }
            Query::ChunkChecksum {
                table,
                columns,
                shape,
            } => self.chunk_checksum(table, columns, shape),
            Query::RowHashes {
                table,
                key,
                columns,
                sample,
            } => {
                let key = format!("t.{}", quote_mysql(key)?);
                Ok(format!(
                    "SELECT {key}, HEX({}) AS row_crc FROM {} t WHERE {}{} ORDER BY {key}",
                    row_crc(columns)?,
                    qualify(table)?,
                    range_filter(&key),
                    sample_filter(&key, *sample)
                ))
            }
            Query::ReadRow {
                table,
                key,
                columns,
            } => Ok(format!(
                "SELECT {} FROM {} WHERE {} = ?",
                quote_columns(columns, None)?.join(", "),
                qualify(table)?,
                quote_mysql(key)?
            )),
            Query::UpsertRow { table, columns } => {
                let quoted = quote_columns(columns, None)?;
                let placeholders = vec!["?"; quoted.len()].join(", ");
                let updates: Vec<String> = quoted
                    .iter()
                    .map(|c| format!("{c} = VALUES({c})"))
                    .collect();
                Ok(format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    qualify(table)?,
                    quoted.join(", "),
                    placeholders,
                    updates.join(", ")
                ))
            }
            Query::DeleteRow { table, key } => Ok(format!(
                "DELETE FROM {} WHERE {} = ?",
                qualify(table)?,
                quote_mysql(key)?
            )),
            Query::Ping => Ok("SELECT 1".to_string()),
            Query::Store { store, op } => self.store(store, op),
        }
    }

    fn chunk_checksum(&self, table: &TableRef, columns: &[String], shape: &ChunkShape) -> Result<String> {
        let tbl = qualify(table)?;
        let crc = row_crc(columns)?;
        let inner = match shape {
            ChunkShape::KeyRange { key, sample } => {
                let key = format!("t.{}", quote_mysql(key)?);
                format!(
                    "SELECT {crc} AS row_crc FROM {tbl} t WHERE {}{}",
                    range_filter(&key),
                    sample_filter(&key, *sample)
                )
            }
            ChunkShape::KeyedWindow { keys } => {
                let plain = quote_columns(keys, None)?.join(", ");
                let join: Vec<String> = keys
                    .iter()
                    .map(|k| {
                        let k = quote_mysql(k)?;
                        Ok(format!("t.{k} = q.{k}"))
                    })
                    .collect::<Result<_>>()?;
                format!(
                    "SELECT {crc} AS row_crc FROM (SELECT {plain} FROM {tbl} \
                     ORDER BY {plain} LIMIT ?, ?) q JOIN {tbl} t ON {}",
                    join.join(" AND ")
                )
            }
            ChunkShape::Window => format!("SELECT {crc} AS row_crc FROM {tbl} t LIMIT ?, ?"),
        };
        Ok(format!(
            "SELECT HEX(CRC32(COALESCE(SUM(x.row_crc), 0))) AS crc, COUNT(*) AS cnt FROM ({inner}) x"
        ))
    }

    fn store(&self, store: &StoreRef, op: &StoreOp) -> Result<String> {
        let s = qualify_mysql(&store.database, &store.table)?;
        let sql = match op {
            StoreOp::CreateDatabase => {
                format!("CREATE DATABASE IF NOT EXISTS {}", quote_mysql(&store.database)?)
            }
            StoreOp::CreateTable => format!(
                "CREATE TABLE IF NOT EXISTS {s} (
                    db CHAR(64) NOT NULL,
                    tbl CHAR(64) NOT NULL,
                    chunk INT NOT NULL,
                    chunk_time FLOAT NULL,
                    chunk_index VARCHAR(200) NULL,
                    lower_boundary TEXT NULL,
                    upper_boundary TEXT NULL,
                    this_crc CHAR(40) NOT NULL,
                    this_cnt INT NOT NULL,
                    master_crc CHAR(40) NULL,
                    master_cnt INT NULL,
                    ts TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                    PRIMARY KEY (db, tbl, chunk),
                    KEY ts_db_tbl (ts, db, tbl)
                ) ENGINE=InnoDB"
            ),
            StoreOp::DropTable => format!("DROP TABLE IF EXISTS {s}"),
            // Bound as literals from validated config, not values
            StoreOp::TableExists => format!(
                "SELECT COUNT(*) FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
                string_literal(&store.database),
                string_literal(&store.table)
            ),
            StoreOp::ClearMaster => format!("UPDATE {s} SET master_crc = NULL, master_cnt = NULL"),
            StoreOp::LoadTable => format!(
                "SELECT {RECORD_COLUMNS} FROM {s} WHERE db = ? AND tbl = ? ORDER BY chunk"
            ),
            StoreOp::DeleteTable => format!("DELETE FROM {s} WHERE db = ? AND tbl = ?"),
            StoreOp::LoadAll => {
                format!("SELECT {RECORD_COLUMNS} FROM {s} ORDER BY db, tbl, chunk")
            }
            StoreOp::LoadStale => format!(
                "SELECT {RECORD_COLUMNS} FROM (SELECT * FROM {s} \
                 WHERE ts < DATE_SUB(NOW(), INTERVAL ? DAY) OR this_crc = '' \
                 ORDER BY RAND() LIMIT ?) stale ORDER BY db, tbl, chunk"
            ),
            StoreOp::LoadChunk => format!(
                "SELECT {RECORD_COLUMNS} FROM {s} WHERE db = ? AND tbl = ? AND chunk = ?"
            ),
            StoreOp::PutBoundary => format!(
                "REPLACE INTO {s} (db, tbl, chunk, chunk_time, chunk_index, lower_boundary, \
                 upper_boundary, this_crc, this_cnt, master_crc, master_cnt, ts) \
                 VALUES (?, ?, ?, NULL, ?, ?, ?, '', 0, NULL, NULL, NOW())"
            ),
            StoreOp::PutChecksum => format!(
                "INSERT INTO {s} (db, tbl, chunk, chunk_time, chunk_index, lower_boundary, \
                 upper_boundary, this_crc, this_cnt, ts) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NOW()) \
                 ON DUPLICATE KEY UPDATE chunk_time = VALUES(chunk_time), \
                 chunk_index = VALUES(chunk_index), lower_boundary = VALUES(lower_boundary), \
                 upper_boundary = VALUES(upper_boundary), this_crc = VALUES(this_crc), \
                 this_cnt = VALUES(this_cnt), ts = VALUES(ts)"
            ),
            StoreOp::PutMaster => format!(
                "INSERT INTO {s} (db, tbl, chunk, chunk_index, lower_boundary, upper_boundary, \
                 this_crc, this_cnt, master_crc, master_cnt) \
                 VALUES (?, ?, ?, ?, ?, ?, '', 0, ?, ?) \
                 ON DUPLICATE KEY UPDATE master_crc = VALUES(master_crc), \
                 master_cnt = VALUES(master_cnt), ts = ts"
            ),
            StoreOp::Divergent => format!(
                "SELECT {RECORD_COLUMNS} FROM {s} \
                 WHERE master_crc <> '' AND master_crc IS NOT NULL \
                 AND (this_crc <> master_crc OR this_cnt <> master_cnt) \
                 ORDER BY db, tbl, chunk"
            ),
            StoreOp::Hashed => format!(
                "SELECT {RECORD_COLUMNS} FROM {s} WHERE this_crc <> '' ORDER BY db, tbl, chunk"
            ),
        };
        Ok(sql)
    }
}

fn qualify(table: &TableRef) -> Result<String> {
    qualify_mysql(&table.schema, &table.name)
}

/// Per-row CRC; QUOTE keeps NULL distinct from the string 'NULL' and separates columns.
fn row_crc(columns: &[String]) -> Result<String> {
    let quoted: Vec<String> = quote_columns(columns, Some("t"))?
        .into_iter()
        .map(|c| format!("QUOTE({c})"))
        .collect();
    Ok(format!("CRC32(CONCAT({}))", quoted.join(", ")))
}

fn range_filter(key: &str) -> String {
    format!("{key} >= ? AND {key} <= ?")
}

fn sample_filter(key: &str, sample: Option<u64>) -> String {
    match sample {
        Some(skip) if skip > 0 => format!(" AND ({key} MOD {skip}) = 0"),
        _ => String::new(),
    }
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
