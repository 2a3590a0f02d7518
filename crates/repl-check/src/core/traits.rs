//! Executor abstractions the engine is written against.
//!
//! - [`SqlExecutor`]: one connection to one server; prepare, bind, execute, fetch
//! - [`Connector`]: opens an executor for a configured server
//!
//! The MySQL driver implements both; the engine tests substitute in-memory
//! servers.

use async_trait::async_trait;

use super::query::Query;
use super::value::{Row, SqlValue};
use crate::config::DsnConfig;
use crate::error::Result;

/// A single connection to a single server.
///
/// Work on one executor is strictly ordered. Prepared statements belong to
/// the connection that prepared them.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Handle for a prepared statement.
    type Statement: Send + Sync;

    /// Server name for logs and reports.
    fn server(&self) -> &str;

    /// Prepare a statement for repeated execution.
    async fn prepare(&mut self, query: &Query) -> Result<Self::Statement>;

    /// Run a prepared statement and collect its rows.
    async fn fetch(&mut self, stmt: &Self::Statement, params: Vec<SqlValue>) -> Result<Vec<Row>>;

    /// Run a prepared statement, returning affected rows.
    async fn execute(&mut self, stmt: &Self::Statement, params: Vec<SqlValue>) -> Result<u64>;

    /// Cheap round trip that keeps an idle connection alive.
    async fn ping(&mut self) -> Result<()>;

    /// SQL text of a prepared statement, for logs and dry runs.
    fn describe(&self, stmt: &Self::Statement) -> String;

    /// Prepare and fetch in one call.
    async fn fetch_query(&mut self, query: &Query, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        let stmt = self.prepare(query).await?;
        self.fetch(&stmt, params).await
    }

    /// Prepare and execute in one call.
    async fn execute_query(&mut self, query: &Query, params: Vec<SqlValue>) -> Result<u64> {
        let stmt = self.prepare(query).await?;
        self.execute(&stmt, params).await
    }
}

/// Opens executors for configured servers.
#[async_trait]
pub trait Connector: Send + Sync {
    type Executor: SqlExecutor;

    /// Connect to a server, applying its session settings.
    async fn connect(&self, dsn: &DsnConfig) -> Result<Self::Executor>;
}
