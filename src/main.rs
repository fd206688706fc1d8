//! blueflag binary entrypoint.
//! Parses the CLI, loads configuration, wires the pipeline and runs either a
//! single cycle or the continuous loop (with the optional status server).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use blueflag::api::{self, AppState};
use blueflag::metrics::Metrics;
use blueflag::store::DedupStore;
use blueflag::{build_scheduler, open_stores, AppConfig, CycleOutcome, Scheduler};

#[derive(Parser)]
#[command(name = "blueflag", version, about = "Relay new channel videos to a community feed, at most once each")]
struct Cli {
    /// Path to the TOML config (falls back to $BLUEFLAG_CONFIG, then config/blueflag.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run cycles on the configured interval until interrupted.
    Run {
        /// Override `[status] bind`, e.g. 127.0.0.1:8088
        #[arg(long)]
        status_bind: Option<String>,
    },
    /// Run exactly one cycle, print its report and exit.
    Once {
        /// Score and log, but publish nothing and record nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print quota window and dedup ledger state.
    Status,
    /// Load and validate config, channel and keyword tables.
    CheckConfig,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blueflag=info,warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Cancel `token` on Ctrl-C so in-flight work winds down cooperatively.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut cfg = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::CheckConfig => check_config(&cfg),
        Command::Status => print_status(&cfg),
        Command::Once { dry_run } => {
            if dry_run {
                cfg.publish.dry_run = true;
            }
            run_once(&cfg).await
        }
        Command::Run { status_bind } => {
            if status_bind.is_some() {
                cfg.status.bind = status_bind;
            }
            run_continuous(&cfg).await
        }
    }
}

fn check_config(cfg: &AppConfig) -> Result<()> {
    let channels = cfg.load_channels()?;
    let keywords = cfg.load_keywords()?;
    let summary = json!({
        "channels": channels.len(),
        "secondary_tags": channels.iter().map(|c| c.secondary_tags.len()).sum::<usize>(),
        "auto_reject_keywords": keywords.auto_reject.keywords.len(),
        "accept_threshold": cfg.scoring.accept_threshold,
        "quota_ceiling": cfg.quota.ceiling,
        "units_per_poll": cfg.quota.units_per_poll,
        "interval_minutes": cfg.scan.interval_minutes,
        "dry_run": cfg.publish.dry_run,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_status(cfg: &AppConfig) -> Result<()> {
    let (dedup, ledger) = open_stores(cfg)?;
    let quota = ledger.snapshot();
    let out = json!({
        "quota": {
            "window_start": quota.window_start,
            "consumed": quota.consumed,
            "ceiling": quota.ceiling,
            "remaining": quota.remaining(),
        },
        "published_records": dedup.len()?,
        "dedup_path": dedup.path(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Seed dedup from the feed when `[dedup] sync_feed_on_start` is set.
async fn sync_feed(scheduler: &Scheduler, cfg: &AppConfig) -> Result<()> {
    if cfg.dedup.sync_feed_on_start {
        scheduler
            .sync_feed(cfg.dedup.sync_feed_limit)
            .await
            .context("seeding dedup ledger from the feed")?;
    }
    Ok(())
}

async fn run_once(cfg: &AppConfig) -> Result<()> {
    let scheduler = build_scheduler(cfg)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    sync_feed(&scheduler, cfg).await?;

    match scheduler.run_cycle(&cancel).await? {
        CycleOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        CycleOutcome::Coalesced => bail!("another cycle is already running"),
        CycleOutcome::BackingOff { until } => bail!("backing off until {until}"),
    }
}

async fn run_continuous(cfg: &AppConfig) -> Result<()> {
    let metrics = Metrics::install()?;
    let scheduler = Arc::new(build_scheduler(cfg)?);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    sync_feed(&scheduler, cfg).await?;

    let server = cfg.status.bind.clone().map(|bind| {
        let state = AppState {
            scheduler: scheduler.clone(),
            metrics: Some(metrics.handle.clone()),
        };
        let token = cancel.clone();
        tokio::spawn(async move { api::serve(&bind, state, token).await })
    });

    scheduler.run_continuous(cancel.clone()).await;

    if let Some(handle) = server {
        cancel.cancel();
        handle.await.context("status server task panicked")??;
    }
    Ok(())
}
