//! Margin Sentinel - Main Entry Point
//!
//! Runs the LP margin monitoring loop until interrupted, or performs a
//! one-shot margin check via the `check` subcommand.

use anyhow::Result;
use clap::{Parser, Subcommand};
use margin_sentinel::analysis::AnalysisClient;
use margin_sentinel::card::CardStore;
use margin_sentinel::config::Config;
use margin_sentinel::gateway::{EigenFlowClient, MarginDataProvider};
use margin_sentinel::monitor::MonitorService;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Margin Sentinel CLI
#[derive(Parser)]
#[command(name = "margin-sentinel")]
#[command(version, about = "LP margin monitoring with human-in-the-loop alert cards")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch current margin utilization once and exit
    Check {
        /// Restrict the check to a single LP
        #[arg(short, long)]
        lp: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize comprehensive logging
    init_logging()?;

    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    if let Some(Commands::Check { lp }) = cli.command {
        return run_check(&config, lp.as_deref()).await;
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Margin Sentinel v{}                          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    log_config(&config);

    // Initialize components
    let store = CardStore::new();
    let provider = Arc::new(EigenFlowClient::new(&config.gateway)?);
    let analysis = Arc::new(AnalysisClient::new(&config.analysis)?);
    let service = Arc::new(MonitorService::new(&config, store, provider, analysis));

    service.start();

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received");
    service.stop();

    let status = service.status().await;
    info!(
        "📋 Final state: {} card(s) by status: {:?}",
        status.card_counts.values().sum::<usize>(),
        status.card_counts
    );

    Ok(())
}

/// One-shot margin check against the live gateway.
async fn run_check(config: &Config, only_lp: Option<&str>) -> Result<()> {
    let client = EigenFlowClient::new(&config.gateway)?;

    let lps = match only_lp {
        Some(lp) => vec![lp.to_string()],
        None => client.lp_identifiers().await?,
    };

    for lp in &lps {
        match client.margin_for(lp).await {
            Ok(snapshot) => {
                let pct = snapshot.margin_utilization * dec!(100);
                if snapshot.margin_utilization >= config.monitor.trigger_threshold {
                    warn!("🚨 {} | margin utilization {:.2}% (above trigger)", lp, pct);
                } else {
                    info!("✅ {} | margin utilization {:.2}%", lp, pct);
                }
            }
            Err(e) => warn!("❌ {} | check failed: {}", lp, e),
        }
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "margin-sentinel.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("margin_sentinel=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Gateway: {}", config.gateway.base_url);
    info!(
        "   Poll Interval: {}s",
        config.monitor.poll_interval_secs
    );
    info!(
        "   Trigger Threshold: {:.0}%",
        config.monitor.trigger_threshold * dec!(100)
    );
    info!(
        "   Resolve Threshold: {:.0}%",
        config.monitor.resolve_threshold * dec!(100)
    );
    info!(
        "   Reminder Burst: every {}s for the first {}s",
        config.notification.initial_frequency_secs, config.notification.initial_window_secs
    );
    info!(
        "   Reminder Cooldown: every {}s",
        config.notification.cooldown_frequency_secs
    );
    info!("   Analysis Timeout: {}s", config.analysis.timeout_secs);
}
