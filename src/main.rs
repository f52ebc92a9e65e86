use std::process::{self, ExitCode};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use business_miner_lib::config::Config;
use business_miner_lib::logger;
use business_miner_lib::scheduler::{Scheduler, SchedulerSettings};
use business_miner_lib::Miner;

const BANNER: &str = r#"
+--------------------------------------------------------------+
|                       BUSINESS MINER                         |
|           Company data mining for Brazilian businesses       |
|                                                              |
|  Runs: every interval, plus daily cleanup and statistics     |
|  Output: PDF, Excel, Word, HTML, ZIP, CSV                    |
+--------------------------------------------------------------+
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run the scheduler until interrupted
    Scheduled,
    /// Run one mining pass for --size/--state/--niche
    Manual,
    /// Smoke-test the components, then run the automatic presets
    Test,
    /// Print scheduler, storage and configuration state
    Status,
}

#[derive(Debug, Parser)]
#[command(name = "business-miner", version, about = "Scheduled company data miner for Brazilian businesses")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Scheduled)]
    mode: Mode,

    /// Company size for manual mining (Micro, Pequena, Média, Grande)
    #[arg(long)]
    size: Option<String>,

    /// State code for manual mining (e.g. SP)
    #[arg(long)]
    state: Option<String>,

    /// Business niche for manual mining
    #[arg(long)]
    niche: Option<String>,

    /// Mining interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Remove old files before running
    #[arg(long)]
    clear: bool,

    /// Print statistics before running
    #[arg(long)]
    stats: bool,
}

fn main() -> ExitCode {
    println!("{}", BANNER);
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger::init(&config.log) {
        eprintln!("Failed to initialize logger: {:#}", e);
        return ExitCode::FAILURE;
    }
    if let Some(secs) = cli.interval {
        config.interval = Duration::from_secs(secs);
        info!("Interval set to {} seconds", secs);
    }

    match run(&cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Execution failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: Config) -> Result<()> {
    let miner = Arc::new(Miner::from_config(config).context("building miner")?);

    if cli.clear {
        clear_old_files(&miner);
    }
    if cli.stats {
        show_statistics(&miner)?;
    }

    match cli.mode {
        Mode::Scheduled => run_scheduled(miner),
        Mode::Manual => run_manual(cli, &miner),
        Mode::Test => run_test(&miner),
        Mode::Status => show_status(miner),
    }
}

fn run_scheduled(miner: Arc<Miner>) -> Result<()> {
    info!("=== STARTING SCHEDULED MODE ===");
    let settings = SchedulerSettings::from_config(miner.config());
    let scheduler = Arc::new(Scheduler::new(miner, settings));

    let handler_scheduler = Arc::clone(&scheduler);
    ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down...");
        handler_scheduler.stop();
        process::exit(0);
    })
    .context("installing signal handler")?;

    scheduler.start().context("starting scheduler")?;
    info!("Scheduler running. Press Ctrl+C to stop.");
    scheduler.wait();

    scheduler.stop();
    info!("Scheduled mode finished");
    Ok(())
}

fn run_manual(cli: &Cli, miner: &Miner) -> Result<()> {
    info!("=== STARTING MANUAL MODE ===");
    let (Some(size), Some(state), Some(niche)) = (&cli.size, &cli.state, &cli.niche) else {
        bail!("manual mode requires --size, --state and --niche");
    };

    info!("Running manual mining: {}, {}, {}", size, state, niche);
    let report = miner.execute_mining(size, state, niche);
    if report.is_success() {
        info!("Manual mining finished successfully");
        info!("Result: {}", report.summary);
    } else {
        error!("Manual mining failed");
        error!("Error: {}", report.message.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

fn run_test(miner: &Miner) -> Result<()> {
    info!("=== STARTING TEST MODE ===");
    check_components(miner);

    info!("Running test mining...");
    let reports = miner.execute_automatic_mining();
    let failed = reports.iter().filter(|r| !r.is_success()).count();
    info!("Test finished: {} executions, {} failed", reports.len(), failed);

    let stats = serde_json::to_string_pretty(&miner.statistics())?;
    info!("Statistics: {}", stats);
    Ok(())
}

fn check_components(miner: &Miner) {
    info!("Checking system components...");
    info!("Configuration loaded: interval {}s", miner.config().interval.as_secs());
    info!("Logger working");
    let snapshot = miner.storage().snapshot();
    info!(
        "Storage working: {:?} ({} files, {} MB)",
        snapshot.storage_path, snapshot.total_files, snapshot.total_size_mb
    );
    info!("All components working");
}

fn show_status(miner: Arc<Miner>) -> Result<()> {
    info!("=== SYSTEM STATUS ===");
    let config = miner.config().clone();
    let scheduler = Scheduler::new(miner.clone(), SchedulerSettings::from_config(&config));

    info!("Scheduler status:");
    info!("{}", serde_json::to_string_pretty(&scheduler.status())?);

    info!("Storage:");
    info!("{}", serde_json::to_string_pretty(&miner.storage().snapshot())?);

    info!("Current configuration:");
    info!("  Interval: {}s", config.interval.as_secs());
    info!("  Timeout: {}s", config.request_timeout.as_secs());
    info!("  Max results: {}", config.max_results);
    Ok(())
}

fn show_statistics(miner: &Miner) -> Result<()> {
    info!("=== SYSTEM STATISTICS ===");
    let stats = miner.statistics();
    if stats.over_quota {
        warn!("Storage is above its configured quota");
    }
    info!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn clear_old_files(miner: &Miner) {
    info!("=== CLEARING OLD FILES ===");
    let days = miner.config().cleanup_retention_days;
    let removed = miner.cleanup_old_files(days);
    info!("Cleanup finished: {} files removed", removed);
}
