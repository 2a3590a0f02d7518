//! Divergence reports.
//!
//! After master results are published into a replica store, the replica's
//! divergent chunks are read back, rendered as a text table and handed to
//! the configured [`Notifier`]s.

mod notify;

pub use notify::{Notifier, PrintNotifier, SendmailNotifier};

use comfy_table::presets::ASCII_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;

use crate::core::traits::SqlExecutor;
use crate::error::Result;
use crate::store::{ChecksumStore, ChunkRecord};

pub const SUBJECT: &str = "Replication Check Results";
const SYNCHED: &str = "OK: All Records Synched";
const UNSYNCHED: &str = "Error: Unsynched Records Found";

const HEADER: [&str; 12] = [
    "db",
    "tbl",
    "chunk",
    "chunk_time",
    "chunk_index",
    "lower_boundary",
    "upper_boundary",
    "this_crc",
    "this_cnt",
    "master_crc",
    "master_cnt",
    "ts",
];

/// Divergence findings for one replica.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub server: String,
    /// Where the run's log is written, mentioned in the message body.
    pub log_file: Option<String>,
    pub divergent: Vec<ChunkRecord>,
}

impl Report {
    /// Read the divergent chunks from `replica`'s store.
    pub async fn collect<E: SqlExecutor>(replica: &mut E, store: &ChecksumStore) -> Result<Self> {
        let divergent = store.divergent(replica).await?;
        Ok(Self {
            server: replica.server().to_string(),
            log_file: None,
            divergent,
        })
    }

    pub fn with_log_file(mut self, log_file: Option<String>) -> Self {
        self.log_file = log_file;
        self
    }

    pub fn is_synched(&self) -> bool {
        self.divergent.is_empty()
    }

    /// Divergent chunks indexed by offset windows; concurrent writes can
    /// shift their rows, so the verdict may be a false positive.
    pub fn approximate(&self) -> usize {
        self.divergent.iter().filter(|r| r.is_approximate()).count()
    }

    pub fn status_line(&self) -> &'static str {
        if self.is_synched() {
            SYNCHED
        } else {
            UNSYNCHED
        }
    }

    /// Message body: header, status banner and, when divergent, the table.
    pub fn render(&self) -> String {
        let mut out = format!("{} from {}. \n", SUBJECT, self.server);
        if let Some(log) = &self.log_file {
            out.push_str(&format!("For more info, see log at: {}\n", log));
        }
        out.push('\n');
        out.push_str(&format!("******** {} ********\n\n", self.status_line()));
        if !self.is_synched() {
            let approximate = self.approximate();
            if approximate > 0 {
                out.push_str(&format!(
                    "{} of {} chunks are offset windows (LIMIT) and may be approximate\n\n",
                    approximate,
                    self.divergent.len()
                ));
            }
            out.push_str(&render_table(&self.divergent));
            out.push('\n');
        }
        out
    }
}

/// Fixed-width text table of checksum records.
pub fn render_table(records: &[ChunkRecord]) -> String {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(HEADER.to_vec());

    for r in records {
        table.add_row(vec![
            r.db.clone(),
            r.tbl.clone(),
            r.chunk.to_string(),
            r.chunk_time.map(|t| format!("{:.4}", t)).unwrap_or_default(),
            r.chunk_index.to_string(),
            r.lower_boundary.clone(),
            r.upper_boundary.clone(),
            r.this_crc.clone(),
            r.this_cnt.to_string(),
            r.master_crc.clone().unwrap_or_default(),
            r.master_cnt.map(|c| c.to_string()).unwrap_or_default(),
            r.ts.clone().unwrap_or_default(),
        ]);
    }
    table.to_string()
}
