//! Grid scanning: find the first available slot in a target category.
//!
//! The page is read once per scan as an HTML snapshot and parsed with
//! `scraper`; the only live interactions are the consent check and, later,
//! the click on the returned handle.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;

use crate::browser::PageDriver;
use crate::models::{ActivationHandle, CandidateSlot};
use crate::site;
use crate::utils::error::AppError;
use crate::Result;

const CONSENT_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    AlreadyChecked,
    /// Was unchecked and is checked now.
    Checked,
    /// Still unchecked after activating it.
    Unconfirmed,
    /// The control is not on the page.
    Missing,
}

impl ConsentState {
    pub fn is_checked(self) -> bool {
        matches!(self, ConsentState::AlreadyChecked | ConsentState::Checked)
    }
}

/// Make sure the reservation caution checkbox is ticked.
///
/// The input is hidden inside its label, so the label is clicked; without a
/// label the `checked` property is set directly.
pub async fn ensure_consent(page: &dyn PageDriver) -> Result<ConsentState> {
    if !page.exists(&site::CONSENT_CHECKBOX).await? {
        tracing::warn!("Consent checkbox not found");
        return Ok(ConsentState::Missing);
    }

    if page.is_checked(&site::CONSENT_CHECKBOX).await? {
        tracing::debug!("Consent checkbox already checked");
        return Ok(ConsentState::AlreadyChecked);
    }

    tracing::info!("Checking consent checkbox");
    if page.exists(&site::CONSENT_LABEL).await? {
        page.click(&site::CONSENT_LABEL).await?;
        tracing::debug!("Clicked consent checkbox label");
    } else {
        page.force_check(&site::CONSENT_CHECKBOX).await?;
        tracing::debug!("Force-checked consent checkbox");
    }

    tokio::time::sleep(CONSENT_SETTLE).await;

    if page.is_checked(&site::CONSENT_CHECKBOX).await? {
        tracing::info!("Consent checkbox successfully checked");
        Ok(ConsentState::Checked)
    } else {
        tracing::error!("Failed to check consent checkbox");
        Ok(ConsentState::Unconfirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Available,
    Unavailable,
    OutOfPeriod,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    /// 1-based position among the row's `td` elements.
    pub td_index: usize,
    /// 0-based index of the first date column the cell covers.
    pub column: usize,
    pub span: usize,
    pub state: CellState,
    pub has_link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub row_id: String,
    pub category: String,
    pub cells: Vec<GridCell>,
}

impl CategoryRow {
    /// Number of date columns the row's cells cover.
    pub fn width(&self) -> usize {
        self.cells.iter().map(|c| c.span).sum()
    }

    pub fn available_cells(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter().filter(|c| c.state == CellState::Available)
    }
}

/// Dates and rows of the grid as rendered at one instant.
///
/// Column positions are only meaningful for the page instance the snapshot
/// was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGridSnapshot {
    pub dates: Vec<String>,
    pub rows: Vec<CategoryRow>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Parse {
        message: format!("Invalid CSS selector '{}': {:?}", css, e),
    })
}

fn has_classes(element: &ElementRef<'_>, classes: &[&str]) -> bool {
    let own: HashSet<&str> = element.value().classes().collect();
    classes.iter().all(|c| own.contains(c))
}

fn normalized_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell_state(cell: &ElementRef<'_>) -> CellState {
    if has_classes(cell, &site::AVAILABLE_CLASSES) {
        CellState::Available
    } else if has_classes(cell, &[site::UNAVAILABLE_CLASS]) {
        CellState::Unavailable
    } else if has_classes(cell, &site::OUT_OF_PERIOD_CLASSES) {
        CellState::OutOfPeriod
    } else {
        CellState::Unknown
    }
}

impl SlotGridSnapshot {
    /// Parse the header dates and every category row.
    ///
    /// Fails when the header row has no dates; everything past the header is
    /// read leniently.
    pub fn parse(html: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let header_cells = selector(site::DATE_HEADER_CELLS)?;
        let row_selector = selector(site::CATEGORY_ROWS)?;
        let name_cell = selector(site::CATEGORY_NAME_CELL)?;
        let link = selector(site::AVAILABLE_SLOT_LINK)?;

        let dates: Vec<String> = document
            .select(&header_cells)
            .map(|cell| normalized_text(&cell))
            .collect();
        if dates.is_empty() {
            return Err(AppError::element_not_found(site::DATE_HEADER_CELLS));
        }

        let mut rows = Vec::new();
        for row in document.select(&row_selector) {
            let Some(name) = row.select(&name_cell).next() else {
                continue;
            };
            let row_id = row.value().id().unwrap_or_default().to_string();

            let mut column = 0;
            let mut cells = Vec::new();
            // Direct td children only, nested tables belong to their own rows.
            for (i, cell) in row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "td")
                .enumerate()
            {
                let span = cell
                    .value()
                    .attr("colspan")
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .filter(|&s| s > 0)
                    .unwrap_or(1);
                cells.push(GridCell {
                    td_index: i + 1,
                    column,
                    span,
                    state: cell_state(&cell),
                    has_link: cell.select(&link).next().is_some(),
                });
                column += span;
            }

            rows.push(CategoryRow {
                row_id,
                category: normalized_text(&name),
                cells,
            });
        }

        Ok(Self { dates, rows })
    }
}

/// Result of inspecting one available cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellResult {
    Found(CandidateSlot),
    NotFound,
    Error(String),
}

fn inspect_cell(snapshot: &SlotGridSnapshot, row: &CategoryRow, cell: &GridCell) -> CellResult {
    if row.width() != snapshot.dates.len() {
        return CellResult::Error(format!(
            "row {} covers {} columns but the header has {} dates",
            row.row_id,
            row.width(),
            snapshot.dates.len()
        ));
    }
    if row.row_id.is_empty() {
        return CellResult::Error(format!("row for {} has no id", row.category));
    }
    if !cell.has_link {
        return CellResult::NotFound;
    }
    match snapshot.dates.get(cell.column) {
        Some(date) => CellResult::Found(CandidateSlot::new(
            row.category.clone(),
            date.clone(),
            ActivationHandle::for_cell(&row.row_id, cell.td_index, site::AVAILABLE_SLOT_LINK),
        )),
        None => CellResult::Error(format!("column {} has no header date", cell.column)),
    }
}

/// Finds available slots for a fixed set of categories.
#[derive(Debug, Clone)]
pub struct GridScanner {
    targets: Vec<String>,
}

impl GridScanner {
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Result for every available cell in target rows, in page order.
    pub fn inspect(&self, snapshot: &SlotGridSnapshot) -> Vec<CellResult> {
        snapshot
            .rows
            .iter()
            .filter(|row| self.targets.contains(&row.category))
            .flat_map(|row| row.available_cells().map(move |cell| inspect_cell(snapshot, row, cell)))
            .collect()
    }

    /// First available slot in page order: earliest row, then earliest column.
    pub fn find_first(&self, snapshot: &SlotGridSnapshot) -> Option<CandidateSlot> {
        for result in self.inspect(snapshot) {
            match result {
                CellResult::Found(slot) => return Some(slot),
                CellResult::NotFound => tracing::debug!("Available cell without a slot link"),
                CellResult::Error(e) => tracing::warn!("Skipping grid cell: {}", e),
            }
        }
        None
    }

    /// Scan the current page. Never fails: any problem is logged and
    /// reported as no hit.
    pub async fn scan(&self, page: &dyn PageDriver) -> Option<CandidateSlot> {
        tracing::debug!("Checking availability for categories: {:?}", self.targets);

        match self.try_scan(page).await {
            Ok(Some(slot)) => {
                tracing::info!("✓ Found available slot: {} on {}", slot.category, slot.date);
                Some(slot)
            }
            Ok(None) => {
                tracing::debug!("No available slots found");
                None
            }
            Err(e) => {
                tracing::warn!("Error checking availability: {}", e);
                None
            }
        }
    }

    async fn try_scan(&self, page: &dyn PageDriver) -> Result<Option<CandidateSlot>> {
        if !ensure_consent(page).await?.is_checked() {
            tracing::warn!("Cannot check availability - consent checkbox issue");
            return Ok(None);
        }

        let html = page.content().await?;
        let snapshot = SlotGridSnapshot::parse(&html)?;
        tracing::debug!(
            "Found {} date columns and {} category rows",
            snapshot.dates.len(),
            snapshot.rows.len()
        );

        Ok(self.find_first(&snapshot))
    }
}
