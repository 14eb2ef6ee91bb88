/*!
 * Hansard CLI
 *
 * Exit codes: 0 when every unit succeeded, 1 when a run finished with
 * failed units or records (or was interrupted), 2 on setup errors.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hansard::{
    config::HansardConfig,
    error::{EXIT_FATAL, EXIT_SUCCESS},
    logging, ResilientClient, SyncReport, SyncSettings, Syncer,
};
use hansard_core_store::{EntityKind, RecordStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hansard")]
#[command(version, about = "Resilient, idempotent ingestion of legislative open data", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Record store path, or :memory: (overrides store.path)
    #[arg(long, value_name = "PATH", global = true)]
    store: Option<String>,

    /// Upstream base URL (overrides api.base_url)
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every month in a year range
    Backfill {
        /// First year (inclusive)
        #[arg(long)]
        from: i32,

        /// Last year (inclusive)
        #[arg(long)]
        to: i32,
    },

    /// Refresh the roster, the current month and recent propositions
    Incremental,

    /// Show stored record counts and recent runs
    Status {
        /// Number of runs to list
        #[arg(long, default_value = "10")]
        runs: usize,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

fn load_config(cli: &Cli) -> Result<HansardConfig> {
    let mut config = match cli.config {
        Some(ref path) => HansardConfig::from_file(path)?,
        None => HansardConfig::default(),
    };

    if let Some(ref url) = cli.base_url {
        config.api.base_url = url.clone();
    }
    if let Some(ref store) = cli.store {
        config.store.path = store.clone();
    }
    if cli.verbose {
        config.logging.verbose = true;
    }

    Ok(config)
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Commands::CheckConfig = cli.command {
        config.validate()?;
        print!("{}", config.to_toml()?);
        return Ok(EXIT_SUCCESS);
    }

    logging::init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start async runtime")?;

    runtime.block_on(execute(cli.command, config))
}

async fn execute(command: Commands, config: HansardConfig) -> Result<i32> {
    let store = hansard_core_store::open(&config.store.path)
        .await
        .with_context(|| format!("Cannot open store at {}", config.store.path))?;

    if let Commands::Status { runs } = command {
        print_status(store.as_ref(), runs).await?;
        return Ok(EXIT_SUCCESS);
    }

    config.validate()?;

    let shutdown = CancellationToken::new();
    let client = Arc::new(ResilientClient::from_config(&config, &shutdown)?);
    let syncer = Syncer::new(client.clone(), store, SyncSettings::from_config(&config));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current requests");
            signal_token.cancel();
        }
    });

    let report = match command {
        Commands::Backfill { from, to } => syncer.run_backfill(&shutdown, from, to).await?,
        Commands::Incremental => syncer.run_incremental(&shutdown).await,
        Commands::Status { .. } | Commands::CheckConfig => return Ok(EXIT_SUCCESS),
    };

    for (name, snapshot) in client.breaker_snapshots().await {
        info!(
            breaker = %name,
            state = ?snapshot.state,
            consecutive_failures = snapshot.consecutive_failures,
            "Breaker state at end of run"
        );
    }
    shutdown.cancel();

    print_report(&report);
    Ok(report.exit_code())
}

fn print_report(report: &SyncReport) {
    let c = &report.counts;
    println!("{} run: {}", report.mode, report.status());
    if let Some(window) = report.window {
        println!("  window:    {}", window);
    }
    println!(
        "  roster:    {}",
        if report.roster_synced { "synced" } else { "not synced" }
    );
    println!(
        "  units:     {} ok, {} failed",
        c.units_succeeded, c.units_failed
    );
    println!(
        "  records:   {} fetched, {} persisted, {} skipped, {} failed",
        c.records_fetched, c.records_persisted, c.records_skipped, c.records_failed
    );
    if !report.failed_units.is_empty() {
        println!("  failed:    {}", report.failed_units.join(", "));
    }
    println!(
        "  elapsed:   {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
}

async fn print_status(store: &dyn RecordStore, runs: usize) -> Result<()> {
    println!("Records");
    for kind in EntityKind::ALL {
        println!("  {:<13}{}", kind.table(), store.count(kind).await?);
    }

    let recent = store.recent_runs(runs).await?;
    println!("Recent runs");
    if recent.is_empty() {
        println!("  (none)");
    }
    for run in recent {
        let window = match (run.window_start, run.window_end) {
            (Some(start), Some(end)) => format!("{}..{}", start, end),
            _ => "-".to_string(),
        };
        println!(
            "  #{:<5} {:<12} {:<10} {}  {:<23} units {}/{}  records {}",
            run.id.unwrap_or_default(),
            run.mode.to_string(),
            run.status.to_string(),
            run.finished_at.format("%Y-%m-%d %H:%M:%S"),
            window,
            run.counts.units_succeeded,
            run.counts.units_succeeded + run.counts.units_failed,
            run.counts.records_persisted,
        );
    }
    Ok(())
}
