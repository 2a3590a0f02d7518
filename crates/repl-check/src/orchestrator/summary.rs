//! Run summary and phase selection.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};
use crate::index::IndexStats;
use crate::sync::SyncStats;
use crate::transfer::TransferStats;

/// Phases to run, always in the order index, hash, report, sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phases {
    pub index: bool,
    pub hash: bool,
    pub report: bool,
    pub sync: bool,
}

impl Phases {
    /// With no phase requested, index, hash and report run.
    pub fn or_default(self) -> Self {
        if self.index || self.hash || self.report || self.sync {
            self
        } else {
            Self::default()
        }
    }

    pub fn names(&self) -> Vec<String> {
        [
            (self.index, "index"),
            (self.hash, "hash"),
            (self.report, "report"),
            (self.sync, "sync"),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| name.to_string())
        .collect()
    }
}

impl Default for Phases {
    fn default() -> Self {
        Self {
            index: true,
            hash: true,
            report: true,
            sync: false,
        }
    }
}

/// One explicit chunk, written `db=..&tbl=..&chunk=..`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundarySelector {
    pub db: String,
    pub tbl: String,
    pub chunk: i64,
}

impl FromStr for BoundarySelector {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self> {
        let mut db = None;
        let mut tbl = None;
        let mut chunk = None;

        for pair in s.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                CheckError::Config(format!("boundary: '{}' is not key=value", pair))
            })?;
            match key.trim() {
                "db" => db = Some(value.trim().to_string()),
                "tbl" => tbl = Some(value.trim().to_string()),
                "chunk" => {
                    chunk = Some(value.trim().parse::<i64>().map_err(|_| {
                        CheckError::Config(format!("boundary: chunk '{}' is not a number", value))
                    })?)
                }
                other => {
                    return Err(CheckError::Config(format!(
                        "boundary: unknown key '{}' (expected db, tbl, chunk)",
                        other
                    )))
                }
            }
        }

        match (db, tbl, chunk) {
            (Some(db), Some(tbl), Some(chunk)) if !db.is_empty() && !tbl.is_empty() => {
                Ok(Self { db, tbl, chunk })
            }
            _ => Err(CheckError::Config(format!(
                "boundary '{}' needs db, tbl and chunk",
                s
            ))),
        }
    }
}

impl fmt::Display for BoundarySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db={}&tbl={}&chunk={}", self.db, self.tbl, self.chunk)
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Hash of the configuration the run used.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Phases that ran.
    pub phases: Vec<String>,

    /// Indexing totals, when the index phase ran.
    pub index: Option<IndexStats>,

    /// Chunk results recorded, summed over servers.
    pub chunks_hashed: usize,

    /// Chunks skipped after a logged failure or because the table is ignored.
    pub chunks_skipped: usize,

    /// Servers dropped from the run after losing their connection.
    pub failed_servers: Vec<String>,

    /// Master results published per replica.
    pub published: BTreeMap<String, TransferStats>,

    /// Divergent chunks per replica.
    pub divergent: BTreeMap<String, usize>,

    /// Divergent offset-window chunks per replica.
    pub approximate: BTreeMap<String, usize>,

    /// Repair totals per replica.
    pub sync: BTreeMap<String, SyncStats>,
}

impl RunSummary {
    pub fn new(run_id: String, config_hash: String, phases: &Phases) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            config_hash,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            phases: phases.names(),
            index: None,
            chunks_hashed: 0,
            chunks_skipped: 0,
            failed_servers: Vec::new(),
            published: BTreeMap::new(),
            divergent: BTreeMap::new(),
            approximate: BTreeMap::new(),
            sync: BTreeMap::new(),
        }
    }

    pub fn finish(&mut self) {
        self.completed_at = Utc::now();
        self.duration_seconds =
            (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
    }

    /// Every reported replica is in sync. Vacuously true without a report phase.
    pub fn is_synched(&self) -> bool {
        self.divergent.values().all(|n| *n == 0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
