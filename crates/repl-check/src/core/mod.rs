//! Core types shared by every phase.
//!
//! - [`schema`]: table metadata, chunking strategy and key values
//! - [`value`]: bound parameter and result values
//! - [`query`]: structural statement descriptions
//! - [`traits`]: executor and connector capabilities
//! - [`identifier`]: the single identifier quoting path

pub mod identifier;
pub mod query;
pub mod schema;
pub mod traits;
pub mod value;

pub use query::{ChunkShape, Query, StoreOp, StoreRef, TableRef};
pub use schema::{ChunkStrategy, Column, KeyValue, TableMeta};
pub use traits::{Connector, SqlExecutor};
pub use value::{describe_params, Row, SqlValue};
