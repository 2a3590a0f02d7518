//! Configuration validation.

use super::{Config, DsnConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{CheckError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let general = &config.general;

    if general.force_reset && general.incremental_check {
        return Err(CheckError::Config(
            "general.force_reset and general.incremental_check cannot be combined".into(),
        ));
    }

    validate_dsn("master", &config.master)?;
    if config.slaves.is_empty() {
        return Err(CheckError::Config(
            "at least one entry in slaves is required".into(),
        ));
    }
    for (i, slave) in config.slaves.iter().enumerate() {
        validate_dsn(&format!("slaves[{}]", i), slave)?;
    }

    // Walk stalls when a page holds a single key
    if general.min_block_size < 2 {
        return Err(CheckError::Config(
            "general.min_block_size must be at least 2".into(),
        ));
    }
    if general.min_block_size > general.max_block_size {
        return Err(CheckError::Config(format!(
            "general.min_block_size ({}) exceeds general.max_block_size ({})",
            general.min_block_size, general.max_block_size
        )));
    }
    if general.incremental_check && general.incremental_batchsize == 0 {
        return Err(CheckError::Config(
            "general.incremental_batchsize must be at least 1".into(),
        ));
    }

    validate_identifier(&general.database)
        .map_err(|e| CheckError::Config(format!("general.database: {}", e)))?;
    validate_identifier(&general.table)
        .map_err(|e| CheckError::Config(format!("general.table: {}", e)))?;

    for entry in &general.ignore_tables {
        match entry.split_once('.') {
            Some((db, tbl)) if !db.is_empty() && !tbl.is_empty() => {}
            _ => {
                return Err(CheckError::Config(format!(
                    "general.ignore_tables entry '{}' must be db.table",
                    entry
                )))
            }
        }
    }

    Ok(())
}

fn validate_dsn(section: &str, dsn: &DsnConfig) -> Result<()> {
    if dsn.host.is_empty() {
        return Err(CheckError::Config(format!("{}.host is required", section)));
    }
    if dsn.username.is_empty() {
        return Err(CheckError::Config(format!(
            "{}.username is required",
            section
        )));
    }
    if dsn.wait_timeout == 0 {
        return Err(CheckError::Config(format!(
            "{}.wait_timeout must be at least 1",
            section
        )));
    }
    Ok(())
}
