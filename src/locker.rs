//! Four-stage reservation lock.
//!
//! slot → time selection → procedure explanation → locked. There is no undo
//! on the site; a failure leaves the page wherever it stopped.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::browser::{click_first, LoadState, Locator, PageDriver, UrlPattern};
use crate::models::{BookingOutcome, CandidateSlot, UNKNOWN_TIME};
use crate::site;
use crate::utils::error::AppError;
use crate::Result;

/// Whole sequence is expected to finish within this.
pub const BOOKING_BUDGET: Duration = Duration::from_secs(15);

/// Fixed waits used between steps.
#[derive(Debug, Clone, Copy)]
pub struct LockTimings {
    /// After clicking the slot and the submit button.
    pub after_click: Duration,
    /// Bound for each URL wait and each network-idle wait.
    pub page_wait: Duration,
    pub time_settle: Duration,
    pub agree_settle: Duration,
}

impl Default for LockTimings {
    fn default() -> Self {
        Self {
            after_click: Duration::from_secs(1),
            page_wait: Duration::from_secs(10),
            time_settle: Duration::from_millis(500),
            agree_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selected,
    TimeChosen,
    Submitted,
    ExplanationShown,
    Locked,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Selected => "slot selection",
            Stage::TimeChosen => "time selection",
            Stage::Submitted => "reservation submit",
            Stage::ExplanationShown => "procedure agreement",
            Stage::Locked => "locked",
        };
        f.write_str(name)
    }
}

/// A time checkbox on the time selection page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOption {
    pub id: Option<String>,
    pub label: Option<String>,
    /// Enclosing cell is marked `enable`.
    pub enabled: bool,
    pub in_cell: bool,
}

/// Read the time checkboxes of the time selection page in page order.
pub fn parse_time_options(html: &str) -> Result<Vec<TimeOption>> {
    let document = Html::parse_document(html);
    let checkboxes = Selector::parse(site::TIME_CHECKBOXES).map_err(|e| AppError::Parse {
        message: format!("Invalid CSS selector '{}': {:?}", site::TIME_CHECKBOXES, e),
    })?;
    let labels_selector = Selector::parse("label[for]").map_err(|e| AppError::Parse {
        message: format!("Invalid CSS selector 'label[for]': {:?}", e),
    })?;

    let labels: HashMap<&str, String> = document
        .select(&labels_selector)
        .filter_map(|label| {
            let target = label.value().attr("for")?;
            let text = label.text().collect::<String>().trim().to_string();
            Some((target, text))
        })
        .collect();

    Ok(document
        .select(&checkboxes)
        .map(|checkbox| {
            let id = checkbox.value().id().map(str::to_string);
            let cell = checkbox
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "td");
            let enabled = cell
                .map(|td| td.value().classes().any(|c| c == site::ENABLED_TIME_CELL_CLASS))
                .unwrap_or(false);
            let label = id
                .as_deref()
                .and_then(|id| labels.get(id))
                .filter(|text| !text.is_empty())
                .cloned();

            TimeOption {
                id,
                label,
                enabled,
                in_cell: cell.is_some(),
            }
        })
        .collect())
}

struct Progress {
    stage: Stage,
    selected_time: Option<String>,
}

/// Drives the booking pages for one candidate slot.
#[derive(Debug, Clone, Default)]
pub struct ReservationLocker {
    timings: LockTimings,
}

impl ReservationLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timings(timings: LockTimings) -> Self {
        Self { timings }
    }

    /// Run the whole sequence. Never fails: problems become an unsuccessful
    /// [`BookingOutcome`] and the page is left as it is.
    pub async fn lock(&self, page: &dyn PageDriver, candidate: CandidateSlot) -> BookingOutcome {
        let started = Instant::now();
        tracing::info!(
            "Starting booking flow for {} on {}",
            candidate.category,
            candidate.date
        );

        let mut progress = Progress {
            stage: Stage::Selected,
            selected_time: None,
        };

        match self.drive(page, &candidate, &mut progress).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    "✓ Reservation locked successfully in {:.2} seconds",
                    elapsed.as_secs_f64()
                );
                tracing::info!("Browser will remain open for you to complete the remaining form fields");
                if elapsed > BOOKING_BUDGET {
                    tracing::warn!(
                        "Booking took longer than {} seconds",
                        BOOKING_BUDGET.as_secs()
                    );
                }
                let time = progress.selected_time.unwrap_or_else(|| UNKNOWN_TIME.to_string());
                BookingOutcome::locked(&candidate, time, elapsed)
            }
            Err(e) => {
                let elapsed = started.elapsed();
                let detail = format!(
                    "Booking failed at {} after {:.2} seconds: {}",
                    progress.stage,
                    elapsed.as_secs_f64(),
                    e
                );
                tracing::error!("{}", detail);
                BookingOutcome::failed(&candidate, progress.selected_time, detail, elapsed)
            }
        }
    }

    async fn drive(&self, page: &dyn PageDriver, candidate: &CandidateSlot, progress: &mut Progress) -> Result<()> {
        tracing::debug!("Clicking slot element");
        page.click(&candidate.handle.locator).await?;
        tokio::time::sleep(self.timings.after_click).await;
        self.await_page(page, &site::time_selection_page(), "time selection page").await?;
        progress.stage = Stage::TimeChosen;

        progress.selected_time = Some(self.choose_time(page).await);
        tracing::debug!("Clicking '予約する' button");
        click_first(page, site::SUBMIT_BUTTON).await?;
        tracing::info!("✓ Clicked '予約する' button");
        tokio::time::sleep(self.timings.after_click).await;
        progress.stage = Stage::Submitted;

        self.await_page(page, &site::procedure_explanation_page(), "procedure explanation page")
            .await?;
        progress.stage = Stage::ExplanationShown;

        tracing::debug!("Clicking '同意する' button");
        click_first(page, site::AGREE_BUTTON).await?;
        tracing::info!("✓ Clicked '同意する' button - Reservation is now locked!");
        tokio::time::sleep(self.timings.agree_settle).await;
        progress.stage = Stage::Locked;

        Ok(())
    }

    /// Wait for the next page, continuing when the wait runs out.
    async fn await_page(&self, page: &dyn PageDriver, pattern: &UrlPattern, name: &str) -> Result<()> {
        tracing::debug!("Waiting for {}", name);

        let waited = match page.wait_for_url(pattern, self.timings.page_wait).await {
            Ok(()) => page.wait_for_load(LoadState::NetworkIdle, self.timings.page_wait).await,
            Err(e) => Err(e),
        };

        match waited {
            Ok(()) => {
                tracing::info!("✓ {} loaded", capitalize(name));
                Ok(())
            }
            Err(AppError::Timeout { .. }) => {
                tracing::warn!("Timeout waiting for {}, continuing anyway", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort: problems are logged and the label falls back to "Unknown".
    async fn choose_time(&self, page: &dyn PageDriver) -> String {
        tracing::debug!("Selecting first available time");
        match self.try_choose_time(page).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!("Error selecting time: {}", e);
                UNKNOWN_TIME.to_string()
            }
        }
    }

    async fn try_choose_time(&self, page: &dyn PageDriver) -> Result<String> {
        let options = parse_time_options(&page.content().await?)?;
        let Some(first) = options.first() else {
            tracing::warn!("No time checkboxes found");
            return Ok(UNKNOWN_TIME.to_string());
        };

        let label = match options.iter().position(|o| o.enabled) {
            Some(index) => {
                let option = &options[index];
                page.click(&time_cell(option, index)).await?;
                option.label.clone().unwrap_or_else(|| "Unknown time".to_string())
            }
            None if first.in_cell => {
                page.click(&time_cell(first, 0)).await?;
                first.label.clone().unwrap_or_else(|| "First available".to_string())
            }
            None => {
                let locator = match &first.id {
                    Some(id) => Locator::owned_css(format!("input[id='{}']", id)),
                    None => Locator::css(site::TIME_CHECKBOXES),
                };
                page.force_check(&locator).await?;
                first.label.clone().unwrap_or_else(|| "First available".to_string())
            }
        };

        tracing::info!("✓ Selected time: {}", label);
        tokio::time::sleep(self.timings.time_settle).await;
        Ok(label)
    }
}

/// Cell of the `index`-th time checkbox, by id when it has one.
fn time_cell(option: &TimeOption, index: usize) -> Locator {
    match &option.id {
        Some(id) => Locator::cell_of(id.clone()),
        None => Locator::cell_of_nth(site::TIME_CHECKBOXES, index),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
