//! Database driver implementations.
//!
//! Each driver renders [`Query`](crate::core::Query) values to its own SQL
//! dialect and implements [`SqlExecutor`](crate::core::SqlExecutor) and
//! [`Connector`](crate::core::Connector). Replication checking targets MySQL
//! topologies only.

pub mod mysql;

pub use mysql::{MysqlConnector, MysqlDialect, MysqlExecutor};
