//! The outer polling loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::browser::PageDriver;
use crate::locker::ReservationLocker;
use crate::models::BookingOutcome;
use crate::plugins::traits::{deliver, format_booking_message, Notifier};
use crate::scanner::GridScanner;
use crate::utils::error::{AppError, ErrorClass};

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Process-wide stop request, observed by the loop between iterations and
/// during every wait.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so `changed` cannot fail while we wait.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless stopped first. Returns `true` when stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.wait() => true,
            _ = tokio::time::sleep(duration) => self.is_triggered(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Running,
    /// A reservation is held; the page must not be touched again.
    Locked,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    pub phase: MonitorPhase,
    pub scan_count: u64,
    /// Scan count at the last heartbeat line.
    pub last_heartbeat: u64,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            phase: MonitorPhase::Running,
            scan_count: 0,
            last_heartbeat: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    /// Stopped by request while still scanning.
    Stopped,
    /// A reservation was locked; the loop idled until stopped.
    Locked(BookingOutcome),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub refresh_interval: Duration,
    pub reload_timeout: Duration,
    /// Pause after each reload before the next scan.
    pub reload_settle: Duration,
    pub test_mode: bool,
}

impl MonitorSettings {
    pub fn new(refresh_interval: Duration, test_mode: bool) -> Self {
        Self {
            refresh_interval,
            reload_timeout: Duration::from_secs(30),
            reload_settle: Duration::from_secs(1),
            test_mode,
        }
    }

    /// Scans between heartbeat lines, roughly one per minute.
    pub fn heartbeat_every(&self) -> u64 {
        let interval = self.refresh_interval.as_secs().max(1);
        (HEARTBEAT_PERIOD.as_secs() / interval).max(1)
    }
}

/// Owns the page for the life of the run and decides what happens next after
/// each scan.
pub struct Monitor {
    page: Box<dyn PageDriver>,
    notifier: Arc<dyn Notifier>,
    scanner: GridScanner,
    locker: ReservationLocker,
    settings: MonitorSettings,
    shutdown: Shutdown,
    state: MonitorState,
}

impl Monitor {
    pub fn new(
        page: Box<dyn PageDriver>,
        notifier: Arc<dyn Notifier>,
        scanner: GridScanner,
        locker: ReservationLocker,
        settings: MonitorSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            page,
            notifier,
            scanner,
            locker,
            settings,
            shutdown,
            state: MonitorState::new(),
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Poll until stopped or until a reservation is locked. A locked run
    /// still only returns once the stop signal arrives.
    pub async fn run(&mut self) -> MonitorExit {
        tracing::info!("Starting monitoring loop");
        tracing::info!(
            "Will check for slots every {} seconds",
            self.settings.refresh_interval.as_secs()
        );
        self.state.phase = MonitorPhase::Running;

        while !self.shutdown.is_triggered() {
            match self.iteration().await {
                Ok(Some(outcome)) => {
                    self.state.phase = MonitorPhase::Locked;
                    announce_lock(&outcome);
                    self.shutdown.wait().await;
                    tracing::info!("User requested shutdown");
                    self.state.phase = MonitorPhase::Stopped;
                    return MonitorExit::Locked(outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    self.report_error(&e);
                    if self.shutdown.sleep(self.settings.refresh_interval).await {
                        break;
                    }
                }
            }
        }

        self.state.phase = MonitorPhase::Stopped;
        tracing::info!("Monitoring stopped after {} checks", self.state.scan_count);
        MonitorExit::Stopped
    }

    /// One scan, plus booking on a hit. Returns the outcome only for a
    /// successful lock.
    async fn iteration(&mut self) -> Result<Option<BookingOutcome>, AppError> {
        self.state.scan_count += 1;
        let check = self.state.scan_count;

        if check - self.state.last_heartbeat >= self.settings.heartbeat_every() {
            tracing::info!("Monitoring active - checked {} times", check);
            self.state.last_heartbeat = check;
        }

        tracing::debug!("Check #{}: Looking for available slots...", check);
        match self.scanner.scan(self.page.as_ref()).await {
            Some(candidate) => {
                tracing::info!(
                    "Available slot detected: {} on {}",
                    candidate.category,
                    candidate.date
                );
                let outcome = self.locker.lock(self.page.as_ref(), candidate).await;
                let message = format_booking_message(&outcome, self.settings.test_mode);
                deliver(self.notifier.as_ref(), &message).await;

                if outcome.success {
                    return Ok(Some(outcome));
                }
                tracing::warn!(
                    "Booking failed for {} on {}, resuming monitoring",
                    outcome.category,
                    outcome.date
                );
            }
            None => tracing::debug!("Check #{}: No slots available", check),
        }

        if self.shutdown.sleep(self.settings.refresh_interval).await {
            return Ok(None);
        }

        tracing::debug!("Refreshing page for check #{}", check + 1);
        self.page.reload(self.settings.reload_timeout).await?;
        self.shutdown.sleep(self.settings.reload_settle).await;
        Ok(None)
    }

    fn report_error(&self, error: &AppError) {
        let retry_in = self.settings.refresh_interval.as_secs();
        match error.class() {
            ErrorClass::Transient => {
                tracing::warn!("Network error: {}. Retrying in {} seconds...", error, retry_in)
            }
            ErrorClass::Structural => tracing::warn!(
                "Page parsing error: {}. Continuing to next refresh cycle...",
                error
            ),
            ErrorClass::Unclassified => {
                tracing::error!("Unexpected error in monitoring loop: {}", error)
            }
        }
    }
}

fn announce_lock(outcome: &BookingOutcome) {
    let rule = "=".repeat(60);
    tracing::info!("{}", rule);
    tracing::info!("🎉 RESERVATION LOCKED SUCCESSFULLY!");
    tracing::info!("{}", rule);
    tracing::info!("Category: {}", outcome.category);
    tracing::info!("Date: {}", outcome.date);
    tracing::info!("Time: {}", outcome.selected_time);
    tracing::info!("{}", rule);
    tracing::info!("⚠️  IMPORTANT: Browser will remain open");
    tracing::info!("📝 Please complete the remaining form fields manually");
    tracing::info!("🔔 Telegram notification has been sent");
    tracing::info!("{}", rule);
    tracing::info!("Press Ctrl+C when you're done to close the browser");
}
