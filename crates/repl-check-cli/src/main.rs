//! repl-check CLI - chunked checksum verification of MySQL replicas.

use clap::Parser;
use repl_check::{
    BoundarySelector, CheckError, Checker, Config, MysqlConnector, Phases, ProcessLock,
    RunOptions, RunSummary,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "repl-check")]
#[command(about = "Chunked checksum verification and repair of MySQL replicas")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Split replicated tables into chunks on the master
    #[arg(short, long)]
    index: bool,

    /// Checksum the chunks on master and replicas
    #[arg(short = 'k', long)]
    hash: bool,

    /// Compare replicas against the master and deliver reports
    #[arg(short, long)]
    report: bool,

    /// Repair divergent chunks on the replicas
    #[arg(short, long)]
    sync: bool,

    /// Hash one chunk, e.g. --boundary "db=db1&tbl=table1&chunk=0"
    #[arg(long)]
    boundary: Option<String>,

    /// Print reports on stdout
    #[arg(long)]
    print: bool,

    /// Log repair statements instead of running them during sync
    #[arg(long)]
    dryrun: bool,

    /// Turn on debug output
    #[arg(short, long)]
    debug: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Output JSON run summary to stdout
    #[arg(long)]
    output_json: bool,
}

impl Cli {
    fn run_options(&self) -> Result<RunOptions, CheckError> {
        let boundary = self
            .boundary
            .as_deref()
            .map(str::parse::<BoundarySelector>)
            .transpose()?;

        let mut phases = Phases {
            index: self.index,
            hash: self.hash,
            report: self.report,
            sync: self.sync,
        };
        // A lone --boundary means "hash this chunk"
        if boundary.is_some() && !(self.index || self.hash || self.report || self.sync) {
            phases.hash = true;
        }

        Ok(RunOptions {
            phases: phases.or_default(),
            boundary,
            print: self.print,
            dry_run: self.dryrun,
            log_file: self.log_file.as_ref().map(|p| p.display().to_string()),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CheckError> {
    let cli = Cli::parse();

    setup_logging(
        &cli.verbosity,
        cli.debug,
        &cli.log_format,
        cli.log_file.as_deref(),
    )?;

    let options = cli.run_options()?;
    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let _lock = ProcessLock::acquire(&config.general.lock_file)?;
    let cancel_token = setup_signal_handler();

    let checker = Checker::new(config, MysqlConnector);
    let summary = checker.run(&options, cancel_token).await?;

    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nReplication check completed!");
    println!("  Run ID: {}", summary.run_id);
    println!("  Phases: {}", summary.phases.join(", "));
    println!("  Duration: {:.2}s", summary.duration_seconds);
    if let Some(index) = &summary.index {
        println!(
            "  Indexed: {} tables, {} chunks ({} failed)",
            index.tables, index.boundaries, index.failed_tables
        );
    }
    if summary.chunks_hashed + summary.chunks_skipped > 0 {
        println!(
            "  Hashed: {} chunk results ({} skipped)",
            summary.chunks_hashed, summary.chunks_skipped
        );
    }
    for (server, count) in &summary.divergent {
        let approximate = summary.approximate.get(server).copied().unwrap_or(0);
        println!(
            "  {}: {} divergent chunks ({} approximate)",
            server, count, approximate
        );
    }
    for (server, stats) in &summary.sync {
        println!(
            "  {}: {} rows deleted, {} upserted, {} failed, {} chunks skipped",
            server, stats.deleted, stats.upserted, stats.failed, stats.skipped_chunks
        );
    }
    if !summary.failed_servers.is_empty() {
        println!("  Failed servers: {:?}", summary.failed_servers);
    }
}

fn setup_logging(
    verbosity: &str,
    debug: bool,
    format: &str,
    log_file: Option<&Path>,
) -> Result<(), CheckError> {
    let level = if debug {
        Level::DEBUG
    } else {
        match verbosity.to_lowercase().as_str() {
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(log_file.is_none())
        .with_writer(writer);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Cancel the run on SIGINT or SIGTERM. Finished chunks stay recorded, so
/// the next run picks up where this one stopped.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current chunk...", name);
                    token.cancel();
                }
                Err(e) => warn!("Could not install {} handler: {}", name, e),
            }
        });
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Stopping after the current chunk...");
                token.cancel();
            }
            Err(e) => warn!("Could not install Ctrl-C handler: {}", e),
        }
    });

    cancel_token
}
