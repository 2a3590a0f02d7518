//! Identifier validation and quoting.
//!
//! Every table, column and schema name that ends up in SQL text goes through
//! this module. Names come from `information_schema` or the configuration, never
//! from row data, and values are always bound as parameters. Keeping identifier
//! assembly here keeps the injection surface in one auditable place.

use crate::error::{CheckError, Result};

/// MySQL limit for database, table and column names.
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier for security issues.
///
/// Rejects empty names, names containing NUL and names longer than MySQL allows.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CheckError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(CheckError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(CheckError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier using backticks.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Qualify a MySQL table name with its database.
pub fn qualify_mysql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(schema)?, quote_mysql(table)?))
}

/// Quote each column, prefixing with a table alias when given.
pub fn quote_columns(columns: &[String], alias: Option<&str>) -> Result<Vec<String>> {
    columns
        .iter()
        .map(|c| {
            let quoted = quote_mysql(c)?;
            Ok(match alias {
                Some(a) => format!("{}.{}", a, quoted),
                None => quoted,
            })
        })
        .collect()
}
