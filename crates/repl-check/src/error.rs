//! Error types for the replication checker.

use thiserror::Error;

/// Main error type for checksum, report and sync operations.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Configuration error (invalid YAML, missing fields, conflicting options)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not open or keep a server connection
    #[error("Connection error on {server}: {message}")]
    Connection { server: String, message: String },

    /// A prepared statement failed on a server
    #[error("Query failed on {server}: {message}\n  SQL: {sql}\n  Params: {params}")]
    Query {
        server: String,
        sql: String,
        params: String,
        message: String,
    },

    /// Checksum store row could not be decoded or written
    #[error("Checksum store error: {0}")]
    Store(String),

    /// Schema catalog lookup failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Boundary walk failed for a table
    #[error("Boundary computation failed for {table}: {message}")]
    Boundary { table: String, message: String },

    /// Table shape the engine refuses to handle
    #[error("Table {table} is not supported: {reason}")]
    UnsupportedTable { table: String, reason: String },

    /// Another instance holds the process lock
    #[error("Lock error: {0}")]
    Lock(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Driver error not attributed to a specific statement
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// Run was cancelled (SIGINT, SIGTERM)
    #[error("Run cancelled")]
    Cancelled,
}

impl CheckError {
    /// Create a Connection error for a named server
    pub fn connection(server: impl Into<String>, message: impl ToString) -> Self {
        CheckError::Connection {
            server: server.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error carrying enough context to reproduce the failure
    pub fn query(
        server: impl Into<String>,
        sql: impl Into<String>,
        params: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        CheckError::Query {
            server: server.into(),
            sql: sql.into(),
            params: params.into(),
            message: message.to_string(),
        }
    }

    /// Create a Boundary error
    pub fn boundary(table: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::Boundary {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an UnsupportedTable error
    pub fn unsupported(table: impl Into<String>, reason: impl Into<String>) -> Self {
        CheckError::UnsupportedTable {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure means the server connection itself is unusable.
    ///
    /// Per-chunk failures are logged and skipped; connection failures abort the
    /// server's phase.
    pub fn is_connection(&self) -> bool {
        match self {
            CheckError::Connection { .. } => true,
            CheckError::Mysql(e) => matches!(
                e,
                mysql_async::Error::Io(_) | mysql_async::Error::Driver(_)
            ),
            _ => false,
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            CheckError::Config(_) | CheckError::Yaml(_) => 1,
            CheckError::Connection { .. } | CheckError::Mysql(_) => 2,
            CheckError::Query { .. } | CheckError::Store(_) | CheckError::Catalog(_) => 3,
            CheckError::Boundary { .. } => 4,
            CheckError::UnsupportedTable { .. } => 5,
            CheckError::Lock(_) => 6,
            CheckError::Io(_) | CheckError::Json(_) => 7,
            CheckError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for checker operations.
pub type Result<T> = std::result::Result<T, CheckError>;
