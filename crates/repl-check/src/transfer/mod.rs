//! Publishing master checksums into replica stores.
//!
//! The master's `this_crc`/`this_cnt` for every hashed chunk are written into
//! each replica store's `master_crc`/`master_cnt`. The replica's own values
//! are left alone, so a chunk the replica never hashed keeps an empty
//! `this_crc` and shows up as divergent.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::traits::SqlExecutor;
use crate::error::Result;
use crate::store::ChecksumStore;

/// Totals for publishing to one replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferStats {
    /// Master records written to the replica store.
    pub records: usize,

    /// Records that could not be written.
    pub failed: usize,

    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

/// Copy the master's hashed chunk results into `replica`'s store.
///
/// A record that fails to write is logged and counted; a lost connection
/// on either side stops the copy.
pub async fn publish_master_results<M, R>(
    master: &mut M,
    replica: &mut R,
    store: &ChecksumStore,
) -> Result<TransferStats>
where
    M: SqlExecutor,
    R: SqlExecutor,
{
    let started = Instant::now();
    let mut stats = TransferStats::default();

    let records = store.hashed(master).await?;
    debug!(
        "{} -> {}: publishing {} master checksums",
        master.server(),
        replica.server(),
        records.len()
    );

    for record in &records {
        match store.put_master(replica, record).await {
            Ok(()) => stats.records += 1,
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => {
                warn!(
                    "{}: could not publish {} chunk {}: {}",
                    replica.server(),
                    record.table_name(),
                    record.chunk,
                    e
                );
                stats.failed += 1;
            }
        }
    }

    stats.elapsed = started.elapsed();
    info!(
        "{}: received {} master checksums in {:.2}s ({} failed)",
        replica.server(),
        stats.records,
        stats.elapsed.as_secs_f64(),
        stats.failed
    );
    Ok(stats)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
