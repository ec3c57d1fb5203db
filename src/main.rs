//! Sign-Harvester main entry point
//!
//! This is the command-line interface for the Sign-Harvester catalog harvester.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use sign_harvester::config::{load_config_with_hash, validate, Config, StorageBackend};
use sign_harvester::crawler::run_harvest;
use sign_harvester::output::{load_summary, print_summary};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Sign-Harvester: a resumable sign dictionary harvester
///
/// Sign-Harvester lists every sign of the configured dictionary letters,
/// downloads each sign's video into the configured store and writes one
/// metadata file per sign. Progress is saved continuously so an interrupted
/// run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sign-harvester")]
#[command(version)]
#[command(about = "A resumable sign dictionary harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Harvest only these letters instead of the configured ones
    #[arg(long, num_args = 1.., value_name = "LETTER")]
    letters: Option<Vec<String>>,

    /// Start from an empty progress file, ignoring previous runs
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the progress file and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(letters) = &cli.letters {
        config.override_letters(letters);
        validate(&config).context("invalid --letters")?;
    }

    if cli.dry_run {
        handle_dry_run(&config, &config_hash);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_harvest(config, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sign_harvester=info,warn"),
            1 => EnvFilter::new("sign_harvester=debug,info"),
            2 => EnvFilter::new("sign_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, config_hash: &str) {
    println!("=== Sign-Harvester Dry Run ===\n");

    println!("Site:");
    println!("  Base URL: {}", config.site.base_url);
    println!("  Letters ({}): {}", config.site.letters.len(), config.site.letters.join(" "));

    println!("\nWorkers:");
    println!("  Count: {}", config.workers.count);
    println!("  Request delay: {}ms", config.workers.request_delay_ms);
    println!("  Persist every: {} results", config.workers.persist_every);

    println!("\nRetry:");
    println!("  Attempts per request: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {:?} from {}ms up to {}ms",
        config.retry.backoff, config.retry.base_delay_ms, config.retry.max_delay_ms
    );
    println!("  Attempt ceiling per sign: {}", config.retry.entry_attempt_ceiling);

    println!("\nTimeouts:");
    println!(
        "  Page {}s, download {}s, upload {}s, connect {}s",
        config.timeouts.page_secs,
        config.timeouts.download_secs,
        config.timeouts.upload_secs,
        config.timeouts.connect_secs
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Metadata: {}", config.output.metadata_dir);
    println!("  Progress: {}", config.output.progress_path);

    println!("\nStorage:");
    match config.storage.backend {
        StorageBackend::Local => {
            println!("  Local: {}", config.storage.local_dir.as_deref().unwrap_or("-"));
        }
        StorageBackend::ObjectStore => {
            println!(
                "  Object store: {} bucket {}",
                config.storage.endpoint.as_deref().unwrap_or("-"),
                config.storage.bucket.as_deref().unwrap_or("-")
            );
        }
    }

    if config.sync.enabled {
        println!(
            "\nSync: every {} signs in {} (remote: {})",
            config.sync.every,
            config.sync.repo_path,
            config.sync.remote.as_deref().unwrap_or("none")
        );
    } else {
        println!("\nSync: disabled");
    }

    println!("\n✓ Configuration is valid (hash: {})", config_hash);
}

/// Handles the --stats mode: summarises the progress file
fn handle_stats(config: &Config) -> Result<()> {
    let path = Path::new(&config.output.progress_path);
    println!("Progress file: {}\n", path.display());

    let summary = load_summary(path)
        .with_context(|| format!("failed to read progress file {}", path.display()))?;
    print_summary(&summary);
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, fresh: bool) -> Result<()> {
    if fresh {
        tracing::info!("Starting fresh harvest (ignoring previous progress)");
    } else {
        tracing::info!("Starting harvest (resuming recorded progress)");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing signs in flight (Ctrl-C again to abort)");
            shutdown_tx.send_replace(true);
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let summary = run_harvest(config, fresh, shutdown_rx)
        .await
        .context("harvest stopped")?;

    print_summary(&summary);
    Ok(())
}
