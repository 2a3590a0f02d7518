//! [`SqlExecutor`] over a single `mysql_async` connection.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, DriverError, OptsBuilder, Params, Statement, Value};
use tracing::debug;

use super::dialect::MysqlDialect;
use crate::config::DsnConfig;
use crate::core::query::Query;
use crate::core::traits::{Connector, SqlExecutor};
use crate::core::value::{describe_params, Row, SqlValue};
use crate::error::{CheckError, Result};

/// A statement prepared on one connection.
pub struct MysqlStatement {
    sql: String,
    inner: Option<Statement>,
}

/// One connection to one MySQL server.
pub struct MysqlExecutor {
    name: String,
    conn: Conn,
    dialect: MysqlDialect,
}

impl MysqlExecutor {
    /// Connect and apply session settings (`SET NAMES utf8`, `wait_timeout`, extra options).
    pub async fn connect(dsn: &DsnConfig) -> Result<Self> {
        let name = dsn.display_name();

        let mut init = vec![
            "SET NAMES utf8".to_string(),
            format!("SET SESSION wait_timeout = {}", dsn.wait_timeout),
        ];
        init.extend(dsn.options.iter().cloned());

        let opts = OptsBuilder::default()
            .ip_or_hostname(dsn.host.clone())
            .tcp_port(dsn.port)
            .user(Some(dsn.username.clone()))
            .pass(Some(dsn.password.clone()))
            .init(init);

        let conn = Conn::new(opts)
            .await
            .map_err(|e| CheckError::connection(&name, e))?;
        debug!("{}: connected (wait_timeout={}s)", name, dsn.wait_timeout);

        Ok(Self {
            name,
            conn,
            dialect: MysqlDialect::new(),
        })
    }

    fn classify(&self, stmt: &MysqlStatement, params: &str, err: mysql_async::Error) -> CheckError {
        if is_connection_loss(&err) {
            CheckError::connection(&self.name, err)
        } else {
            CheckError::query(&self.name, &stmt.sql, params, err)
        }
    }
}

/// Server codes for a connection the server dropped or killed.
const ER_SERVER_SHUTDOWN: u16 = 1053;
const ER_CONNECTION_KILLED: u16 = 1927;
const CR_SERVER_GONE_ERROR: u16 = 2006;
const CR_SERVER_LOST: u16 = 2013;

/// The connection can no longer be used. Everything else (bad parameters,
/// conversion failures, SQL errors) is a failure of the one statement.
fn is_connection_loss(err: &mysql_async::Error) -> bool {
    match err {
        mysql_async::Error::Io(_) => true,
        mysql_async::Error::Driver(driver) => matches!(
            driver,
            DriverError::ConnectionClosed
                | DriverError::PoolDisconnected
                | DriverError::PacketOutOfOrder
                | DriverError::UnexpectedPacket { .. }
                | DriverError::BadCompressedPacketHeader
        ),
        mysql_async::Error::Server(server) => matches!(
            server.code,
            ER_SERVER_SHUTDOWN | ER_CONNECTION_KILLED | CR_SERVER_GONE_ERROR | CR_SERVER_LOST
        ),
        _ => false,
    }
}

#[async_trait]
impl SqlExecutor for MysqlExecutor {
    type Statement = MysqlStatement;

    fn server(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self, query: &Query) -> Result<MysqlStatement> {
        let sql = self.dialect.render(query)?;
        if query.requires_text_protocol() {
            return Ok(MysqlStatement { sql, inner: None });
        }
        match self.conn.prep(sql.as_str()).await {
            Ok(stmt) => Ok(MysqlStatement {
                sql,
                inner: Some(stmt),
            }),
            Err(e) => {
                let pending = MysqlStatement { sql, inner: None };
                Err(self.classify(&pending, "[]", e))
            }
        }
    }

    async fn fetch(&mut self, stmt: &MysqlStatement, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        let described = describe_params(&params);
        let result: std::result::Result<Vec<mysql_async::Row>, _> = match &stmt.inner {
            Some(prepared) => self.conn.exec(prepared, to_params(params)).await,
            None => self.conn.query(stmt.sql.as_str()).await,
        };
        let rows = result.map_err(|e| self.classify(stmt, &described, e))?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn execute(&mut self, stmt: &MysqlStatement, params: Vec<SqlValue>) -> Result<u64> {
        let described = describe_params(&params);
        let result = match &stmt.inner {
            Some(prepared) => self.conn.exec_drop(prepared, to_params(params)).await,
            None => self.conn.query_drop(stmt.sql.as_str()).await,
        };
        result.map_err(|e| self.classify(stmt, &described, e))?;
        Ok(self.conn.affected_rows())
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn
            .query_drop("SELECT 1")
            .await
            .map_err(|e| CheckError::connection(&self.name, e))
    }

    fn describe(&self, stmt: &MysqlStatement) -> String {
        stmt.sql.clone()
    }
}

/// Opens [`MysqlExecutor`]s.
#[derive(Debug, Clone, Default)]
pub struct MysqlConnector;

#[async_trait]
impl Connector for MysqlConnector {
    type Executor = MysqlExecutor;

    async fn connect(&self, dsn: &DsnConfig) -> Result<MysqlExecutor> {
        MysqlExecutor::connect(dsn).await
    }
}

fn to_params(params: Vec<SqlValue>) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(params.into_iter().map(to_mysql).collect())
}

fn to_mysql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Int(v) => Value::Int(v),
        SqlValue::UInt(v) => Value::UInt(v),
        SqlValue::Float(v) => Value::Double(v),
        SqlValue::Text(s) => Value::Bytes(s.into_bytes()),
        SqlValue::Bytes(b) => Value::Bytes(b),
    }
}

fn from_row(row: mysql_async::Row) -> Row {
    (0..row.len())
        .map(|i| from_mysql(row.as_ref(i).cloned().unwrap_or(Value::NULL)))
        .collect()
}

fn from_mysql(value: Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::Int(v),
        Value::UInt(v) => SqlValue::UInt(v),
        Value::Float(v) => SqlValue::Float(v as f64),
        Value::Double(v) => SqlValue::Float(v),
        Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => SqlValue::Text(s),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        },
        Value::Date(y, mo, d, h, mi, s, us) => {
            let mut text = format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s);
            if us > 0 {
                text.push_str(&format!(".{:06}", us));
            }
            SqlValue::Text(text)
        }
        Value::Time(neg, days, h, mi, s, us) => {
            let hours = days * 24 + u32::from(h);
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if neg { "-" } else { "" },
                hours,
                mi,
                s
            );
            if us > 0 {
                text.push_str(&format!(".{:06}", us));
            }
            SqlValue::Text(text)
        }
    }
}
