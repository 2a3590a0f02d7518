//! Run orchestrator: connects to every server and drives the phases.
//!
//! 1. Index: prepare the checksum stores and walk every replicated table on the master
//! 2. Hash: checksum each chunk on master and replicas concurrently
//! 3. Report: publish master results to each replica, collect and deliver divergences
//! 4. Sync: repair divergent keyed chunks row by row

mod summary;

pub use summary::{BoundarySelector, Phases, RunSummary};

use std::collections::HashSet;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::traits::{Connector, SqlExecutor};
use crate::error::{CheckError, Result};
use crate::hash::{ChunkHasher, HashOutcome, PROFILING};
use crate::index::Indexer;
use crate::report::{Notifier, PrintNotifier, Report, SendmailNotifier};
use crate::store::{Boundary, ChecksumStore};
use crate::sync::Reconciler;
use crate::transfer::publish_master_results;

/// What to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub phases: Phases,
    /// Hash only this chunk.
    pub boundary: Option<BoundarySelector>,
    /// Print reports to stdout.
    pub print: bool,
    /// Log repair statements instead of executing them.
    pub dry_run: bool,
    /// Mentioned in reports so readers can find the details.
    pub log_file: Option<String>,
}

/// Connected servers: the master and every reachable replica.
struct Servers<E> {
    master: E,
    replicas: Vec<E>,
}

/// Drives a replication check against the configured servers.
pub struct Checker<C: Connector> {
    config: Config,
    connector: C,
    store: ChecksumStore,
    notifiers: Option<Vec<Box<dyn Notifier>>>,
}

impl<C: Connector> Checker<C> {
    pub fn new(config: Config, connector: C) -> Self {
        let store = ChecksumStore::new(&config.general.database, &config.general.table);
        Self {
            config,
            connector,
            store,
            notifiers: None,
        }
    }

    /// Replace the notifiers derived from configuration.
    pub fn with_notifiers(mut self, notifiers: Vec<Box<dyn Notifier>>) -> Self {
        self.notifiers = Some(notifiers);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn default_notifiers(&self, print: bool) -> Vec<Box<dyn Notifier>> {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if print || self.config.general.print_results {
            notifiers.push(Box::new(PrintNotifier));
        }
        if !self.config.general.email_report.is_empty() {
            notifiers.push(Box::new(SendmailNotifier::new(
                &self.config.general.email_report,
            )));
        }
        notifiers
    }

    /// Run the selected phases.
    pub async fn run(&self, options: &RunOptions, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let phases = options.phases.or_default();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut summary = RunSummary::new(run_id.clone(), self.config.hash(), &phases);
        info!("Starting run {} (phases: {})", run_id, phases.names().join(", "));

        let mut servers = self.connect(&mut summary).await?;

        if phases.index || phases.hash {
            self.prepare_stores(&mut servers, phases.index, &mut summary)
                .await?;
        }

        if phases.index {
            info!("Phase 1: Indexing {}", servers.master.server());
            let indexer = Indexer::new(self.store.clone(), self.config.general.clone());
            summary.index = Some(indexer.index_all(&mut servers.master, &cancel).await?);
        }

        if phases.hash {
            info!("Phase 2: Hashing");
            servers = self.hash_phase(servers, options, &cancel, &mut summary).await?;
        }

        if phases.report {
            info!("Phase 3: Reporting");
            self.report_phase(&mut servers, options, &cancel, &mut summary)
                .await?;
        }

        if phases.sync {
            info!("Phase 4: Synchronizing{}", if options.dry_run { " (dry run)" } else { "" });
            self.sync_phase(servers, options, &cancel, &mut summary)
                .await?;
        }

        summary.finish();
        info!(
            target: PROFILING,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "run completed"
        );
        info!(
            "Run {} completed in {:.2}s",
            summary.run_id, summary.duration_seconds
        );
        Ok(summary)
    }

    /// Connect to the master (required) and every replica (best effort).
    async fn connect(&self, summary: &mut RunSummary) -> Result<Servers<C::Executor>> {
        let master = self.connector.connect(&self.config.master).await?;
        info!("Connected to master {}", master.server());

        let mut replicas = Vec::with_capacity(self.config.slaves.len());
        for dsn in &self.config.slaves {
            match self.connector.connect(dsn).await {
                Ok(exec) => {
                    info!("Connected to replica {}", exec.server());
                    replicas.push(exec);
                }
                Err(e) => {
                    error!("Replica {} unreachable, left out of this run: {}", dsn.display_name(), e);
                    summary.failed_servers.push(dsn.display_name());
                }
            }
        }
        if replicas.is_empty() {
            warn!("No replica reachable; only the master will be processed");
        }
        Ok(Servers { master, replicas })
    }

    /// Create missing stores everywhere. When `reset` is set (index phase),
    /// apply `force_reset`, or forget old master results unless incremental.
    ///
    /// A replica whose connection fails here is dropped from the run.
    async fn prepare_stores(
        &self,
        servers: &mut Servers<C::Executor>,
        reset: bool,
        summary: &mut RunSummary,
    ) -> Result<()> {
        self.prepare_store(&mut servers.master, reset).await?;

        let mut reachable = Vec::with_capacity(servers.replicas.len());
        for mut replica in servers.replicas.drain(..) {
            match self.prepare_store(&mut replica, reset).await {
                Ok(()) => reachable.push(replica),
                Err(e) if e.is_connection() => {
                    error!("{}: dropped from this run: {}", replica.server(), e);
                    summary.failed_servers.push(replica.server().to_string());
                }
                Err(e) => return Err(e),
            }
        }
        servers.replicas = reachable;
        Ok(())
    }

    async fn prepare_store(&self, exec: &mut C::Executor, reset: bool) -> Result<()> {
        let general = &self.config.general;
        let force_reset = reset && general.force_reset;
        let clear = reset && !general.force_reset && !general.incremental_check;

        if self.store.ensure(exec, force_reset).await? {
            info!("{}: checksum store created", exec.server());
        } else if clear {
            let rows = self.store.clear_master(exec).await?;
            debug!("{}: cleared master results on {} chunks", exec.server(), rows);
        }
        Ok(())
    }

    async fn boundaries(&self, master: &mut C::Executor, options: &RunOptions) -> Result<Vec<Boundary>> {
        let general = &self.config.general;
        let records = if let Some(selector) = &options.boundary {
            info!("Checking single boundary {}", selector);
            let record = self
                .store
                .load_chunk(master, &selector.db, &selector.tbl, selector.chunk)
                .await?
                .ok_or_else(|| {
                    CheckError::Config(format!("boundary {} is not indexed on the master", selector))
                })?;
            vec![record]
        } else if general.incremental_check {
            self.store
                .load_stale(master, general.expire_days, general.incremental_batchsize)
                .await?
        } else {
            self.store.load_all(master).await?
        };
        Ok(records.iter().map(|r| r.boundary()).collect())
    }

    async fn hash_phase(
        &self,
        servers: Servers<C::Executor>,
        options: &RunOptions,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<Servers<C::Executor>> {
        let Servers { mut master, replicas } = servers;
        let boundaries = self.boundaries(&mut master, options).await?;
        info!(
            "Hashing {} chunks on {} servers{}",
            boundaries.len(),
            replicas.len() + 1,
            if self.config.general.incremental_check { " (incremental)" } else { "" }
        );

        // Master first; index 0 is never dropped
        let mut hashers: Vec<ChunkHasher<C::Executor>> = std::iter::once(master)
            .chain(replicas)
            .map(|exec| ChunkHasher::new(exec, self.store.clone(), self.config.general.clone()))
            .collect();
        let mut failed: HashSet<usize> = HashSet::new();
        let total = boundaries.len();
        let mut outcome = Ok(());

        for (i, boundary) in boundaries.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome = Err(CheckError::Cancelled);
                break;
            }

            let results = join_all(
                hashers
                    .iter_mut()
                    .enumerate()
                    .filter(|(idx, _)| !failed.contains(idx))
                    .map(|(idx, hasher)| async move { (idx, hasher.process(boundary).await) }),
            )
            .await;

            for (idx, result) in results {
                match result {
                    Ok(HashOutcome::Hashed(_)) => summary.chunks_hashed += 1,
                    Ok(HashOutcome::Skipped) => summary.chunks_skipped += 1,
                    Err(e) if idx == 0 => {
                        error!("Master lost during hashing: {}", e);
                        outcome = Err(e);
                    }
                    Err(e) => {
                        let server = hashers[idx].server().to_string();
                        error!("{}: dropped from hashing: {}", server, e);
                        summary.failed_servers.push(server);
                        failed.insert(idx);
                    }
                }
            }
            if outcome.is_err() {
                break;
            }

            info!(
                target: PROFILING,
                table = %boundary.table_name(),
                "{:.2}% done",
                (i + 1) as f64 / total as f64 * 100.0
            );
        }

        outcome?;
        let mut executors = hashers
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !failed.contains(idx))
            .map(|(_, hasher)| hasher.into_executor());
        let master = executors
            .next()
            .ok_or_else(|| CheckError::Store("master hasher missing".into()))?;
        Ok(Servers {
            master,
            replicas: executors.collect(),
        })
    }

    async fn report_phase(
        &self,
        servers: &mut Servers<C::Executor>,
        options: &RunOptions,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let defaults;
        let notifiers = match &self.notifiers {
            Some(notifiers) => notifiers,
            None => {
                defaults = self.default_notifiers(options.print);
                &defaults
            }
        };

        for replica in servers.replicas.iter_mut() {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            let server = replica.server().to_string();

            let published = publish_master_results(&mut servers.master, replica, &self.store).await?;
            summary.published.insert(server.clone(), published);

            let report = Report::collect(replica, &self.store)
                .await?
                .with_log_file(options.log_file.clone());
            if report.is_synched() {
                info!("{}: all chunks in sync", server);
            } else {
                warn!(
                    "{}: {} divergent chunks ({} approximate)",
                    server,
                    report.divergent.len(),
                    report.approximate()
                );
            }
            summary.divergent.insert(server.clone(), report.divergent.len());
            summary.approximate.insert(server.clone(), report.approximate());

            for notifier in notifiers {
                if let Err(e) = notifier.notify(&report).await {
                    error!("{}: report delivery via {} failed: {}", server, notifier.name(), e);
                }
            }
        }
        Ok(())
    }

    async fn sync_phase(
        &self,
        servers: Servers<C::Executor>,
        options: &RunOptions,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Servers { mut master, replicas } = servers;

        for mut replica in replicas {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            let server = replica.server().to_string();
            let records = self.store.divergent(&mut replica).await?;
            if records.is_empty() {
                info!("{}: nothing to synchronize", server);
                continue;
            }
            info!("{}: synchronizing {} divergent chunks", server, records.len());

            let hasher = ChunkHasher::new(replica, self.store.clone(), self.config.general.clone());
            let mut reconciler =
                Reconciler::new(master, hasher, self.config.general.clone(), options.dry_run);
            let mut result = Ok(());
            for record in &records {
                if cancel.is_cancelled() {
                    result = Err(CheckError::Cancelled);
                    break;
                }
                if let Err(e) = reconciler.reconcile_chunk(record).await {
                    result = Err(e);
                    break;
                }
            }
            let (returned, _, stats) = reconciler.into_parts();
            master = returned;
            info!(
                "{}: {} chunks repaired, {} rows deleted, {} upserted, {} failed",
                server, stats.chunks, stats.deleted, stats.upserted, stats.failed
            );
            summary.sync.insert(server, stats);
            result?;
        }
        Ok(())
    }
}
