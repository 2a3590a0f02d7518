//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL text for every engine query
//! - [`MysqlExecutor`]: prepared-statement executor over one connection
//! - [`MysqlConnector`]: opens executors from configured DSNs
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod dialect;
mod executor;

pub use dialect::{MysqlDialect, RECORD_COLUMNS};
pub use executor::{MysqlConnector, MysqlExecutor, MysqlStatement};
