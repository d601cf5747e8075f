use anyhow::{anyhow, Context};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use slot_locker::browser::session::SessionFlow;
use slot_locker::browser::{ChromeBrowser, ChromePage};
use slot_locker::config::{AppConfig, Credentials, VALID_LOG_LEVELS};
use slot_locker::monitor::{MonitorExit, MonitorSettings};
use slot_locker::plugins::traits::{deliver, format_error_message, Notifier};
use slot_locker::plugins::TelegramNotifier;
use slot_locker::site::SiteUrls;
use slot_locker::utils::error::classify;
use slot_locker::{GridScanner, Monitor, ReservationLocker, Shutdown};

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "booking_system.log";

#[derive(Parser, Debug)]
#[command(name = "slot-locker", about = "Watches the reservation grid and locks the first open slot")]
struct Cli {
    /// Run browser in headless mode (overrides .env)
    #[arg(long)]
    headless: bool,

    /// Run browser in headed mode (overrides .env)
    #[arg(long)]
    headed: bool,

    /// Run in test mode (overrides .env)
    #[arg(long)]
    test_mode: bool,

    /// Set log level (overrides .env)
    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(VALID_LOG_LEVELS))]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<AppConfig, slot_locker::config::ConfigErrors> {
    let mut config = AppConfig::load()?;
    apply_overrides(cli, &mut config);
    config.validate()?;
    Ok(config)
}

/// Command line flags win over loaded settings; `--headed` wins over `--headless`.
fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if cli.headless {
        config.browser.headless = true;
    }
    if cli.headed {
        config.browser.headless = false;
    }
    if cli.test_mode {
        config.test_mode = true;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(format!("slot_locker={}", config.tracing_level())),
    };

    std::fs::create_dir_all(LOG_DIR).with_context(|| format!("Failed to create {}", LOG_DIR))?;
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}

fn spawn_signal_listener(shutdown: Shutdown) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Could not listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn start_session(flow: &SessionFlow, page: &ChromePage, credentials: &Credentials) -> slot_locker::Result<()> {
    flow.login(page, credentials).await?;
    flow.open_facility_page(page).await
}

async fn close_browser(browser: ChromeBrowser) {
    if let Err(e) = tokio::task::spawn_blocking(move || browser.close()).await {
        warn!("Browser shutdown task failed: {}", e);
    }
}

async fn run(config: AppConfig, shutdown: Shutdown) -> anyhow::Result<()> {
    info!("{}", "=".repeat(60));
    info!("JP Driving License Auto-Booking System");
    info!("{}", "=".repeat(60));
    info!("Target categories: {:?}", config.target_categories);
    info!("Test mode: {}", config.test_mode);
    info!("Refresh interval: {} seconds", config.refresh_interval);

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(
        &config.telegram.bot_token,
        &config.telegram.chat_id,
    )?);

    let browser_config = config.browser.clone();
    let browser = tokio::task::spawn_blocking(move || ChromeBrowser::launch(&browser_config))
        .await
        .map_err(|e| anyhow!("Browser launch task failed: {}", e))??;
    let page = browser.page();

    let flow = SessionFlow::new(SiteUrls::new(&config.site_base_url), LOG_DIR);
    let started = tokio::select! {
        result = start_session(&flow, &page, &config.credentials) => Some(result),
        _ = shutdown.wait() => None,
    };

    match started {
        None => {
            info!("Shutdown requested during start-up");
            close_browser(browser).await;
            return Ok(());
        }
        Some(Err(e)) => {
            let message = format_error_message(&e.to_string(), config.test_mode);
            deliver(notifier.as_ref(), &message).await;
            close_browser(browser).await;
            return Err(e.into());
        }
        Some(Ok(())) => {}
    }

    let mut monitor = Monitor::new(
        Box::new(page),
        Arc::clone(&notifier),
        GridScanner::new(config.target_categories.clone()),
        ReservationLocker::new(),
        MonitorSettings::new(Duration::from_secs(config.refresh_interval), config.test_mode),
        shutdown,
    );

    match monitor.run().await {
        MonitorExit::Locked(outcome) => {
            info!("Closing browser with reservation for {} on {}", outcome.category, outcome.date)
        }
        MonitorExit::Stopped => info!("Monitoring stopped"),
    }

    info!("Cleaning up resources");
    close_browser(browser).await;
    info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_tracing(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    match run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error ({:?}): {:#}", classify(&e), e);
            ExitCode::FAILURE
        }
    }
}
