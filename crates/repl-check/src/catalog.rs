//! Schema catalog reads: replicated databases, tables, columns and keys.

use tracing::debug;

use crate::core::query::Query;
use crate::core::schema::{Column, TableMeta};
use crate::core::traits::SqlExecutor;
use crate::core::value::{Row, SqlValue};
use crate::error::{CheckError, Result};

/// Databases the master writes to its binlog (`Binlog_Do_DB`).
pub async fn replicated_databases<E: SqlExecutor>(exec: &mut E) -> Result<Vec<String>> {
    let rows = exec
        .fetch_query(&Query::ReplicatedDatabases, Vec::new())
        .await?;
    let Some(row) = rows.first() else {
        return Err(CheckError::Catalog(format!(
            "{}: SHOW MASTER STATUS returned nothing (binary logging disabled?)",
            exec.server()
        )));
    };
    let databases = row
        .get(2)
        .and_then(SqlValue::as_text)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|db| !db.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    debug!("{}: replicated databases {:?}", exec.server(), databases);
    Ok(databases)
}

/// Base tables of a schema, without column details.
pub async fn list_tables<E: SqlExecutor>(exec: &mut E, schema: &str) -> Result<Vec<TableMeta>> {
    let rows = exec
        .fetch_query(&Query::ListTables, vec![schema.into()])
        .await?;
    rows.iter().map(|row| table_from_row(schema, row)).collect()
}

/// Full metadata for one table, columns in ordinal order.
pub async fn load_table<E: SqlExecutor>(exec: &mut E, schema: &str, table: &str) -> Result<TableMeta> {
    let params = vec![SqlValue::from(schema), SqlValue::from(table)];
    let info = exec.fetch_query(&Query::TableInfo, params.clone()).await?;
    let Some(row) = info.first() else {
        return Err(CheckError::Catalog(format!(
            "{}: table {}.{} not found",
            exec.server(),
            schema,
            table
        )));
    };
    let mut meta = table_from_row(schema, row)?;

    let rows = exec.fetch_query(&Query::TableColumns, params).await?;
    meta.columns = rows.iter().map(column_from_row).collect::<Result<_>>()?;
    if meta.columns.is_empty() {
        return Err(CheckError::Catalog(format!(
            "{}: table {} has no readable columns",
            exec.server(),
            meta.full_name()
        )));
    }
    Ok(meta)
}

fn table_from_row(schema: &str, row: &Row) -> Result<TableMeta> {
    let name = text_at(row, 0)
        .ok_or_else(|| CheckError::Catalog(format!("table row without name in {}", schema)))?;
    Ok(TableMeta {
        schema: schema.to_string(),
        name,
        engine: text_at(row, 1),
        row_count: row.get(2).and_then(SqlValue::as_i64).unwrap_or(0),
        columns: Vec::new(),
    })
}

fn column_from_row(row: &Row) -> Result<Column> {
    let name = text_at(row, 0)
        .ok_or_else(|| CheckError::Catalog("column row without name".to_string()))?;
    let flag = |i: usize| row.get(i).and_then(SqlValue::as_i64).unwrap_or(0) == 1;
    Ok(Column {
        name,
        data_type: text_at(row, 1).unwrap_or_default(),
        is_primary: flag(2),
        is_auto_increment: flag(3),
        ordinal_pos: row.get(4).and_then(SqlValue::as_i64).unwrap_or(0) as i32,
    })
}

fn text_at(row: &Row, index: usize) -> Option<String> {
    row.get(index).and_then(SqlValue::as_text)
}
