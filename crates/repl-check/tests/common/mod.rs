//! In-memory MySQL stand-in shared by the engine tests.
//!
//! `FakeServer` interprets [`Query`] values directly over in-memory tables and
//! checksum stores. Row checksums follow the server's arithmetic:
//! `CRC32(CONCAT(QUOTE(col)...))` per row, summed, and the sum's decimal text
//! hashed again.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use repl_check::core::query::{ChunkShape, Query, StoreOp, StoreRef, TableRef};
use repl_check::core::value::{describe_params, Row, SqlValue};
use repl_check::drivers::MysqlDialect;
use repl_check::{
    CheckError, ChecksumStore, Config, Connector, DsnConfig, GeneralConfig, Result, SqlExecutor,
};

pub const DAY: i64 = 86_400;

// =============================================================================
// Tables
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeColumn {
    pub name: String,
    pub data_type: String,
    pub primary: bool,
    pub auto_increment: bool,
}

pub fn auto_id(name: &str) -> FakeColumn {
    FakeColumn {
        name: name.to_string(),
        data_type: "int".to_string(),
        primary: true,
        auto_increment: true,
    }
}

pub fn pk(name: &str, data_type: &str) -> FakeColumn {
    FakeColumn {
        name: name.to_string(),
        data_type: data_type.to_string(),
        primary: true,
        auto_increment: false,
    }
}

pub fn col(name: &str, data_type: &str) -> FakeColumn {
    FakeColumn {
        name: name.to_string(),
        data_type: data_type.to_string(),
        primary: false,
        auto_increment: false,
    }
}

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub columns: Vec<FakeColumn>,
    /// Storage order; unordered windows read rows in this order.
    pub rows: Vec<Row>,
}

impl FakeTable {
    pub fn new(columns: Vec<FakeColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    fn index_of(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| CheckError::Catalog(format!("unknown column {}", column)))
    }

    fn indexes(&self, columns: &[String]) -> Result<Vec<usize>> {
        columns.iter().map(|c| self.index_of(c)).collect()
    }

    /// Columns identifying a row for upserts.
    fn identity(&self) -> Vec<usize> {
        let auto: Vec<usize> = (0..self.columns.len())
            .filter(|&i| self.columns[i].auto_increment)
            .collect();
        if auto.len() == 1 {
            return auto;
        }
        (0..self.columns.len())
            .filter(|&i| self.columns[i].primary)
            .collect()
    }
}

/// `orders(id auto, customer, total, note)` with keys `1..=n`.
pub fn orders(n: i64) -> FakeTable {
    FakeTable::new(vec![
        auto_id("id"),
        col("customer", "varchar"),
        col("total", "decimal"),
        col("note", "text"),
    ])
    .with_rows((1..=n).map(order_row).collect())
}

pub fn order_row(id: i64) -> Row {
    vec![
        SqlValue::Int(id),
        SqlValue::Text(format!("customer-{}", id % 7)),
        SqlValue::Text(format!("{}.{:02}", id * 3, id % 100)),
        if id % 5 == 0 {
            SqlValue::Null
        } else {
            SqlValue::Text(format!("it's #{}", id))
        },
    ]
}

/// `codes(code varchar primary, qty)` with keys `"1"..="n"`; their text order
/// is not their numeric order.
pub fn codes(n: i64) -> FakeTable {
    FakeTable::new(vec![pk("code", "varchar"), col("qty", "int")]).with_rows(
        (1..=n)
            .map(|i| vec![SqlValue::Text(i.to_string()), SqlValue::Int(i)])
            .collect(),
    )
}

/// `events(source, payload)` with no key at all.
pub fn keyless(n: i64) -> FakeTable {
    FakeTable::new(vec![col("source", "varchar"), col("payload", "text")]).with_rows(
        (0..n)
            .map(|i| {
                vec![
                    SqlValue::Text(format!("src-{}", i % 3)),
                    SqlValue::Text(format!("payload {}", i)),
                ]
            })
            .collect(),
    )
}

/// `lines(order_id, line_no, sku)` keyed by both ids.
pub fn composite(n: i64) -> FakeTable {
    FakeTable::new(vec![pk("order_id", "int"), pk("line_no", "int"), col("sku", "varchar")])
        .with_rows(
            (0..n)
                .map(|i| {
                    vec![
                        SqlValue::Int(i / 3),
                        SqlValue::Int(i % 3),
                        SqlValue::Text(format!("SKU-{}", i)),
                    ]
                })
                .collect(),
        )
}

// =============================================================================
// Server state
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub chunk_time: Option<f64>,
    pub chunk_index: String,
    pub lower: String,
    pub upper: String,
    pub this_crc: String,
    pub this_cnt: i64,
    pub master_crc: Option<String>,
    pub master_cnt: Option<i64>,
    pub ts: i64,
}

type StoreKey = (String, String, i64);

#[derive(Debug, Default)]
pub struct ServerState {
    /// `Binlog_Do_DB`; `None` means binary logging is off.
    pub binlog_do_db: Option<Vec<String>>,
    pub tables: BTreeMap<(String, String), FakeTable>,
    pub databases: HashSet<String>,
    pub stores: HashMap<StoreRef, BTreeMap<StoreKey, StoreRow>>,
    /// Server clock in seconds.
    pub now: i64,
    /// Statement labels that fail with a query error.
    pub fail: HashSet<String>,
    /// Statement labels whose next run fails with a query error, once.
    pub fail_once: HashSet<String>,
    /// Statement labels that fail as a lost connection.
    pub disconnect_on: HashSet<String>,
    /// Statement labels that run this many times, then fail as a lost connection.
    pub disconnect_after: HashMap<String, usize>,
    /// Key values rejected by row upserts and deletes.
    pub reject_keys: Vec<SqlValue>,
    /// Every statement fails as a lost connection.
    pub down: bool,
    /// Connection attempts are refused.
    pub refuse_connections: bool,
    pub pings: usize,
    /// Labels of statements run, in order.
    pub executed: Vec<String>,
}

/// Label used for failure injection and the execution log.
pub fn label(query: &Query) -> String {
    match query {
        Query::Store { op, .. } => format!("store:{:?}", op),
        other => other.label().to_string(),
    }
}

struct Outcome {
    rows: Vec<Row>,
    affected: u64,
}

impl Outcome {
    fn rows(rows: Vec<Row>) -> Self {
        Self { rows, affected: 0 }
    }

    fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }
}

/// One in-memory server. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeServer {
    name: String,
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(ServerState {
                now: 1_700_000_000,
                ..Default::default()
            })),
        }
    }

    /// Same state under a different connection name.
    pub fn connection(&self, name: String) -> Self {
        Self {
            name,
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn replicate(&self, databases: &[&str]) {
        let mut state = self.state();
        state.binlog_do_db = Some(databases.iter().map(|d| d.to_string()).collect());
        state.databases.extend(databases.iter().map(|d| d.to_string()));
    }

    pub fn add_table(&self, db: &str, name: &str, table: FakeTable) {
        let mut state = self.state();
        state.databases.insert(db.to_string());
        state.tables.insert((db.to_string(), name.to_string()), table);
    }

    pub fn rows(&self, db: &str, name: &str) -> Vec<Row> {
        self.state().tables[&(db.to_string(), name.to_string())]
            .rows
            .clone()
    }

    /// Mutate a table's rows in place.
    pub fn edit_rows(&self, db: &str, name: &str, f: impl FnOnce(&mut Vec<Row>)) {
        let mut state = self.state();
        let table = state
            .tables
            .get_mut(&(db.to_string(), name.to_string()))
            .unwrap();
        f(&mut table.rows);
    }

    pub fn store_rows(&self, store: &ChecksumStore) -> Vec<(StoreKey, StoreRow)> {
        self.state()
            .stores
            .get(store.location())
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn advance(&self, seconds: i64) {
        self.state().now += seconds;
    }

    pub fn count_executed(&self, label: &str) -> usize {
        self.state().executed.iter().filter(|l| *l == label).count()
    }

    fn run(&self, query: &Query, params: &[SqlValue]) -> Result<Outcome> {
        let mut state = self.state();
        let label = label(query);
        let runs = state.executed.iter().filter(|l| **l == label).count();
        let exhausted = state.disconnect_after.get(&label).is_some_and(|n| runs >= *n);
        if state.down || state.disconnect_on.contains(&label) || exhausted {
            return Err(CheckError::connection(&self.name, "Lost connection to MySQL server"));
        }
        if state.fail.contains(&label) || state.fail_once.remove(&label) {
            return Err(CheckError::query(
                &self.name,
                self.describe(query),
                describe_params(params),
                "injected failure",
            ));
        }
        state.executed.push(label);
        let now = state.now;
        eval(&mut state, query, params, now).map_err(|e| match e {
            CheckError::Catalog(message) | CheckError::Store(message) => CheckError::query(
                &self.name,
                self.describe(query),
                describe_params(params),
                message,
            ),
            other => other,
        })
    }
}

#[async_trait]
impl SqlExecutor for FakeServer {
    type Statement = Query;

    fn server(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self, query: &Query) -> Result<Query> {
        if self.state().down {
            return Err(CheckError::connection(&self.name, "Lost connection to MySQL server"));
        }
        // Reject what the real driver would refuse to render
        MysqlDialect::new().render(query)?;
        Ok(query.clone())
    }

    async fn fetch(&mut self, stmt: &Query, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        self.run(stmt, &params).map(|o| o.rows)
    }

    async fn execute(&mut self, stmt: &Query, params: Vec<SqlValue>) -> Result<u64> {
        self.run(stmt, &params).map(|o| o.affected)
    }

    async fn ping(&mut self) -> Result<()> {
        self.run(&Query::Ping, &[])?;
        self.state().pings += 1;
        Ok(())
    }

    fn describe(&self, stmt: &Query) -> String {
        MysqlDialect::new()
            .render(stmt)
            .unwrap_or_else(|_| stmt.label().to_string())
    }
}

// =============================================================================
// Server arithmetic
// =============================================================================

/// `QUOTE(v)`: NULL stays a bare word, everything else is a quoted string.
pub fn quote(value: &SqlValue) -> String {
    let Some(text) = value.as_text() else {
        return "NULL".to_string();
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn row_crc(row: &Row, columns: &[usize]) -> u32 {
    let concat: String = columns.iter().map(|&i| quote(&row[i])).collect();
    crc32fast::hash(concat.as_bytes())
}

/// `HEX(CRC32(COALESCE(SUM(row_crc), 0)))` and `COUNT(*)`.
pub fn aggregate(crcs: impl IntoIterator<Item = u32>) -> (String, i64) {
    let (sum, count) = crcs
        .into_iter()
        .fold((0u64, 0i64), |(s, c), crc| (s + u64::from(crc), c + 1));
    (format!("{:X}", crc32fast::hash(sum.to_string().as_bytes())), count)
}

/// Integer comparison when both sides are integers, text otherwise.
fn compare(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    let numeric = |v: &SqlValue| matches!(v, SqlValue::Int(_) | SqlValue::UInt(_) | SqlValue::Float(_));
    match (numeric(a), numeric(b)) {
        (true, true) => match (a.as_i64(), b.as_i64(), a, b) {
            (Some(x), Some(y), SqlValue::Int(_) | SqlValue::UInt(_), SqlValue::Int(_) | SqlValue::UInt(_)) => {
                x.cmp(&y)
            }
            _ => as_number(a).total_cmp(&as_number(b)),
        },
        (false, false) => a.as_text().cmp(&b.as_text()),
        // MySQL compares a string with a number as numbers
        _ => as_number(a).total_cmp(&as_number(b)),
    }
}

/// MySQL's string-to-number coercion: the leading numeric prefix, else 0.
fn as_number(v: &SqlValue) -> f64 {
    if let Some(f) = v.as_f64() {
        return f;
    }
    let text = v.as_text().unwrap_or_default();
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    text[..end].parse().unwrap_or(0.0)
}

fn compare_keys(a: &Row, b: &Row, keys: &[usize]) -> Ordering {
    keys.iter()
        .map(|&k| compare(&a[k], &b[k]))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn param(params: &[SqlValue], i: usize) -> Result<SqlValue> {
    params
        .get(i)
        .cloned()
        .ok_or_else(|| CheckError::Store(format!("missing bind parameter {}", i)))
}

fn text_param(params: &[SqlValue], i: usize) -> Result<String> {
    Ok(param(params, i)?.as_text().unwrap_or_default())
}

fn int_param(params: &[SqlValue], i: usize) -> Result<i64> {
    param(params, i)?
        .as_i64()
        .ok_or_else(|| CheckError::Store(format!("bind parameter {} is not an integer", i)))
}

fn lookup<'a>(state: &'a ServerState, table: &TableRef) -> Result<&'a FakeTable> {
    state
        .tables
        .get(&(table.schema.clone(), table.name.clone()))
        .ok_or_else(|| {
            CheckError::Catalog(format!("Table '{}.{}' doesn't exist", table.schema, table.name))
        })
}

fn lookup_mut<'a>(state: &'a mut ServerState, table: &TableRef) -> Result<&'a mut FakeTable> {
    state
        .tables
        .get_mut(&(table.schema.clone(), table.name.clone()))
        .ok_or_else(|| {
            CheckError::Catalog(format!("Table '{}.{}' doesn't exist", table.schema, table.name))
        })
}

/// Rows with `lower <= key <= upper`, optionally sampled, in key order.
fn key_range<'a>(
    table: &'a FakeTable,
    key: usize,
    params: &[SqlValue],
    sample: Option<u64>,
) -> Result<Vec<&'a Row>> {
    let lower = param(params, 0)?;
    let upper = param(params, 1)?;
    let mut rows: Vec<&Row> = table
        .rows
        .iter()
        .filter(|r| compare(&r[key], &lower) != Ordering::Less)
        .filter(|r| compare(&r[key], &upper) != Ordering::Greater)
        .filter(|r| match sample {
            Some(skip) if skip > 0 => r[key].as_i64().map(|k| k % skip as i64 == 0).unwrap_or(false),
            _ => true,
        })
        .collect();
    rows.sort_by(|a, b| compare(&a[key], &b[key]));
    Ok(rows)
}

fn window(params: &[SqlValue]) -> Result<(usize, usize)> {
    Ok((int_param(params, 0)? as usize, int_param(params, 1)? as usize))
}

fn table_row(name: &str, table: &FakeTable) -> Row {
    vec![
        SqlValue::Text(name.to_string()),
        SqlValue::Text("InnoDB".to_string()),
        SqlValue::Int(table.rows.len() as i64),
    ]
}

fn record_row(key: &StoreKey, row: &StoreRow) -> Row {
    let ts = chrono::DateTime::from_timestamp(row.ts, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    vec![
        SqlValue::Text(key.0.clone()),
        SqlValue::Text(key.1.clone()),
        SqlValue::Int(key.2),
        row.chunk_time.map(SqlValue::Float).unwrap_or(SqlValue::Null),
        SqlValue::Text(row.chunk_index.clone()),
        SqlValue::Text(row.lower.clone()),
        SqlValue::Text(row.upper.clone()),
        SqlValue::Text(row.this_crc.clone()),
        SqlValue::Int(row.this_cnt),
        row.master_crc.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null),
        row.master_cnt.map(SqlValue::Int).unwrap_or(SqlValue::Null),
        SqlValue::Text(ts),
    ]
}

fn eval(state: &mut ServerState, query: &Query, params: &[SqlValue], now: i64) -> Result<Outcome> {
    match query {
        Query::ReplicatedDatabases => Ok(Outcome::rows(match &state.binlog_do_db {
            Some(dbs) => vec![vec![
                SqlValue::Text("mysql-bin.000042".into()),
                SqlValue::Int(154),
                SqlValue::Text(dbs.join(",")),
                SqlValue::Text(String::new()),
            ]],
            None => Vec::new(),
        })),
        Query::ListTables => {
            let schema = text_param(params, 0)?;
            Ok(Outcome::rows(
                state
                    .tables
                    .iter()
                    .filter(|((db, _), _)| *db == schema)
                    .map(|((_, name), table)| table_row(name, table))
                    .collect(),
            ))
        }
        Query::TableInfo => {
            let key = (text_param(params, 0)?, text_param(params, 1)?);
            Ok(Outcome::rows(
                state
                    .tables
                    .get(&key)
                    .map(|t| vec![table_row(&key.1, t)])
                    .unwrap_or_default(),
            ))
        }
        Query::TableColumns => {
            let key = (text_param(params, 0)?, text_param(params, 1)?);
            Ok(Outcome::rows(
                state
                    .tables
                    .get(&key)
                    .map(|t| {
                        t.columns
                            .iter()
                            .enumerate()
                            .map(|(i, c)| {
                                vec![
                                    SqlValue::Text(c.name.clone()),
                                    SqlValue::Text(c.data_type.clone()),
                                    SqlValue::Int(i64::from(c.primary)),
                                    SqlValue::Int(i64::from(c.auto_increment)),
                                    SqlValue::UInt(i as u64 + 1),
                                ]
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            ))
        }
        Query::KeyLimits { table, key } => {
            let t = lookup(state, table)?;
            let k = t.index_of(key)?;
            let min = t.rows.iter().map(|r| &r[k]).min_by(|a, b| compare(a, b));
            let max = t.rows.iter().map(|r| &r[k]).max_by(|a, b| compare(a, b));
            Ok(Outcome::rows(vec![vec![
                min.cloned().unwrap_or(SqlValue::Null),
                max.cloned().unwrap_or(SqlValue::Null),
            ]]))
        }
        Query::NextUpper { table, key } => {
            let t = lookup(state, table)?;
            let k = t.index_of(key)?;
            let lower = param(params, 0)?;
            let page = int_param(params, 1)? as usize;
            let mut keys: Vec<&SqlValue> = t
                .rows
                .iter()
                .map(|r| &r[k])
                .filter(|v| compare(v, &lower) != Ordering::Less)
                .collect();
            keys.sort_by(|a, b| compare(a, b));
            let upper = keys.into_iter().take(page).last().cloned();
            Ok(Outcome::rows(vec![vec![upper.unwrap_or(SqlValue::Null)]]))
        }
        Query::ChunkChecksum {
            table,
            columns,
            shape,
        } => {
            let t = lookup(state, table)?;
            let cols = t.indexes(columns)?;
            let rows: Vec<&Row> = match shape {
                ChunkShape::KeyRange { key, sample } => {
                    key_range(t, t.index_of(key)?, params, *sample)?
                }
                ChunkShape::KeyedWindow { keys } => {
                    let keys = t.indexes(keys)?;
                    let (offset, count) = window(params)?;
                    let mut sorted: Vec<&Row> = t.rows.iter().collect();
                    sorted.sort_by(|a, b| compare_keys(a, b, &keys));
                    sorted.into_iter().skip(offset).take(count).collect()
                }
                ChunkShape::Window => {
                    let (offset, count) = window(params)?;
                    t.rows.iter().skip(offset).take(count).collect()
                }
            };
            let (crc, cnt) = aggregate(rows.iter().map(|r| row_crc(r, &cols)));
            Ok(Outcome::rows(vec![vec![SqlValue::Text(crc), SqlValue::Int(cnt)]]))
        }
        Query::RowHashes {
            table,
            key,
            columns,
            sample,
        } => {
            let t = lookup(state, table)?;
            let cols = t.indexes(columns)?;
            let k = t.index_of(key)?;
            Ok(Outcome::rows(
                key_range(t, k, params, *sample)?
                    .into_iter()
                    .map(|r| {
                        vec![r[k].clone(), SqlValue::Text(format!("{:X}", row_crc(r, &cols)))]
                    })
                    .collect(),
            ))
        }
        Query::ReadRow {
            table,
            key,
            columns,
        } => {
            let t = lookup(state, table)?;
            let cols = t.indexes(columns)?;
            let k = t.index_of(key)?;
            let value = param(params, 0)?;
            Ok(Outcome::rows(
                t.rows
                    .iter()
                    .filter(|r| compare(&r[k], &value) == Ordering::Equal)
                    .map(|r| cols.iter().map(|&i| r[i].clone()).collect())
                    .collect(),
            ))
        }
        Query::UpsertRow { table, columns } => {
            let reject = state.reject_keys.clone();
            let t = lookup_mut(state, table)?;
            let cols = t.indexes(columns)?;
            let mut row = vec![SqlValue::Null; t.columns.len()];
            for (param_idx, &col_idx) in cols.iter().enumerate() {
                row[col_idx] = param(params, param_idx)?;
            }
            let identity = t.identity();
            if identity
                .iter()
                .any(|&i| reject.iter().any(|r| compare(r, &row[i]) == Ordering::Equal))
            {
                return Err(CheckError::Store("Data too long for column".into()));
            }
            match t
                .rows
                .iter()
                .position(|r| compare_keys(r, &row, &identity) == Ordering::Equal)
            {
                Some(pos) => {
                    t.rows[pos] = row;
                    Ok(Outcome::affected(2))
                }
                None => {
                    t.rows.push(row);
                    Ok(Outcome::affected(1))
                }
            }
        }
        Query::DeleteRow { table, key } => {
            let value = param(params, 0)?;
            if state
                .reject_keys
                .iter()
                .any(|r| compare(r, &value) == Ordering::Equal)
            {
                return Err(CheckError::Store("Lock wait timeout exceeded".into()));
            }
            let t = lookup_mut(state, table)?;
            let k = t.index_of(key)?;
            let before = t.rows.len();
            t.rows.retain(|r| compare(&r[k], &value) != Ordering::Equal);
            Ok(Outcome::affected((before - t.rows.len()) as u64))
        }
        Query::Ping => Ok(Outcome::rows(vec![vec![SqlValue::Int(1)]])),
        Query::Store { store, op } => eval_store(state, store, op, params, now),
    }
}

fn select(
    rows: &BTreeMap<StoreKey, StoreRow>,
    keep: impl Fn(&StoreKey, &StoreRow) -> bool,
) -> Vec<Row> {
    rows.iter()
        .filter(|(k, r)| keep(k, r))
        .map(|(k, r)| record_row(k, r))
        .collect()
}

fn store_key(params: &[SqlValue]) -> Result<StoreKey> {
    Ok((text_param(params, 0)?, text_param(params, 1)?, int_param(params, 2)?))
}

fn eval_store(
    state: &mut ServerState,
    store: &StoreRef,
    op: &StoreOp,
    params: &[SqlValue],
    now: i64,
) -> Result<Outcome> {
    match op {
        StoreOp::CreateDatabase => {
            state.databases.insert(store.database.clone());
            return Ok(Outcome::affected(1));
        }
        StoreOp::CreateTable => {
            if !state.databases.contains(&store.database) {
                return Err(CheckError::Store(format!("Unknown database '{}'", store.database)));
            }
            state.stores.entry(store.clone()).or_default();
            return Ok(Outcome::affected(0));
        }
        StoreOp::DropTable => {
            state.stores.remove(store);
            return Ok(Outcome::affected(0));
        }
        StoreOp::TableExists => {
            let exists = state.stores.contains_key(store);
            return Ok(Outcome::rows(vec![vec![SqlValue::Int(i64::from(exists))]]));
        }
        _ => {}
    }

    let rows = state.stores.get_mut(store).ok_or_else(|| {
        CheckError::Store(format!(
            "Table '{}.{}' doesn't exist",
            store.database, store.table
        ))
    })?;
    match op {
        StoreOp::ClearMaster => {
            for row in rows.values_mut() {
                row.master_crc = None;
                row.master_cnt = None;
            }
            Ok(Outcome::affected(rows.len() as u64))
        }
        StoreOp::LoadTable => {
            let (db, tbl) = (text_param(params, 0)?, text_param(params, 1)?);
            Ok(Outcome::rows(select(rows, |k, _| k.0 == db && k.1 == tbl)))
        }
        StoreOp::DeleteTable => {
            let (db, tbl) = (text_param(params, 0)?, text_param(params, 1)?);
            let before = rows.len();
            rows.retain(|k, _| !(k.0 == db && k.1 == tbl));
            Ok(Outcome::affected((before - rows.len()) as u64))
        }
        StoreOp::LoadAll => Ok(Outcome::rows(select(rows, |_, _| true))),
        StoreOp::LoadStale => {
            let cutoff = now - int_param(params, 0)? * DAY;
            let batch = int_param(params, 1)? as usize;
            let mut stale = select(rows, |_, r| r.ts < cutoff || r.this_crc.is_empty());
            stale.truncate(batch);
            Ok(Outcome::rows(stale))
        }
        StoreOp::LoadChunk => {
            let wanted = store_key(params)?;
            Ok(Outcome::rows(select(rows, |k, _| *k == wanted)))
        }
        StoreOp::PutBoundary => {
            rows.insert(
                store_key(params)?,
                StoreRow {
                    chunk_time: None,
                    chunk_index: text_param(params, 3)?,
                    lower: text_param(params, 4)?,
                    upper: text_param(params, 5)?,
                    this_crc: String::new(),
                    this_cnt: 0,
                    master_crc: None,
                    master_cnt: None,
                    ts: now,
                },
            );
            Ok(Outcome::affected(1))
        }
        StoreOp::PutChecksum => {
            let chunk_time = param(params, 3)?.as_f64();
            let chunk_index = text_param(params, 4)?;
            let lower = text_param(params, 5)?;
            let upper = text_param(params, 6)?;
            let this_crc = text_param(params, 7)?;
            let this_cnt = int_param(params, 8)?;
            let row = rows.entry(store_key(params)?).or_insert_with(|| StoreRow {
                chunk_time: None,
                chunk_index: String::new(),
                lower: String::new(),
                upper: String::new(),
                this_crc: String::new(),
                this_cnt: 0,
                master_crc: None,
                master_cnt: None,
                ts: now,
            });
            row.chunk_time = chunk_time;
            row.chunk_index = chunk_index;
            row.lower = lower;
            row.upper = upper;
            row.this_crc = this_crc;
            row.this_cnt = this_cnt;
            row.ts = now;
            Ok(Outcome::affected(1))
        }
        StoreOp::PutMaster => {
            let master_crc = text_param(params, 6)?;
            let master_cnt = int_param(params, 7)?;
            match rows.get_mut(&store_key(params)?) {
                Some(row) => {
                    row.master_crc = Some(master_crc);
                    row.master_cnt = Some(master_cnt);
                }
                None => {
                    rows.insert(
                        store_key(params)?,
                        StoreRow {
                            chunk_time: None,
                            chunk_index: text_param(params, 3)?,
                            lower: text_param(params, 4)?,
                            upper: text_param(params, 5)?,
                            this_crc: String::new(),
                            this_cnt: 0,
                            master_crc: Some(master_crc),
                            master_cnt: Some(master_cnt),
                            ts: now,
                        },
                    );
                }
            }
            Ok(Outcome::affected(1))
        }
        StoreOp::Divergent => Ok(Outcome::rows(select(rows, |_, r| match &r.master_crc {
            Some(m) if !m.is_empty() => *m != r.this_crc || Some(r.this_cnt) != r.master_cnt,
            _ => false,
        }))),
        StoreOp::Hashed => Ok(Outcome::rows(select(rows, |_, r| !r.this_crc.is_empty()))),
        StoreOp::CreateDatabase | StoreOp::CreateTable | StoreOp::DropTable | StoreOp::TableExists => {
            unreachable!("handled above")
        }
    }
}

// =============================================================================
// Cluster and configuration
// =============================================================================

/// Servers reachable by host name.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    servers: Arc<Mutex<HashMap<String, FakeServer>>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host: &str) -> FakeServer {
        let server = FakeServer::new(&format!("{}:3306", host));
        self.servers
            .lock()
            .unwrap()
            .insert(host.to_string(), server.clone());
        server
    }

    pub fn get(&self, host: &str) -> FakeServer {
        self.servers.lock().unwrap()[host].clone()
    }
}

#[async_trait]
impl Connector for FakeCluster {
    type Executor = FakeServer;

    async fn connect(&self, dsn: &DsnConfig) -> Result<FakeServer> {
        let server = self.servers.lock().unwrap().get(&dsn.host).cloned();
        match server {
            Some(server) if !server.state().refuse_connections => {
                Ok(server.connection(dsn.display_name()))
            }
            _ => Err(CheckError::connection(
                dsn.display_name(),
                format!("Can't connect to MySQL server on '{}'", dsn.host),
            )),
        }
    }
}

pub fn dsn(host: &str) -> DsnConfig {
    DsnConfig {
        name: None,
        host: host.to_string(),
        port: 3306,
        username: "checker".to_string(),
        password: "secret".to_string(),
        options: Vec::new(),
        wait_timeout: 15,
    }
}

/// Small blocks so modest tables split into several chunks.
pub fn general() -> GeneralConfig {
    GeneralConfig {
        min_block_size: 10,
        max_block_size: 1000,
        lock_file: PathBuf::from("unused.pid"),
        ..Default::default()
    }
}

pub fn config(master: &str, replicas: &[&str]) -> Config {
    Config {
        general: general(),
        master: dsn(master),
        slaves: replicas.iter().map(|h| dsn(h)).collect(),
    }
}

pub fn store() -> ChecksumStore {
    ChecksumStore::new("percona", "checksums")
}

/// Master and one replica holding identical `shop.orders` with keys `1..=n`.
pub fn replicated_orders(n: i64) -> (FakeCluster, FakeServer, FakeServer) {
    let cluster = FakeCluster::new();
    let master = cluster.add("master");
    let replica = cluster.add("replica");
    for server in [&master, &replica] {
        server.replicate(&["shop"]);
        server.add_table("shop", "orders", orders(n));
    }
    (cluster, master, replica)
}

/// Integer key of a row's first column.
pub fn key_of(row: &Row) -> i64 {
    row[0].as_i64().unwrap()
}

pub fn sorted_rows(server: &FakeServer, db: &str, name: &str) -> Vec<Row> {
    let mut rows = server.rows(db, name);
    rows.sort_by(|a, b| compare(&a[0], &b[0]));
    rows
}
