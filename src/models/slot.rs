use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::browser::Locator;

/// How to activate the clickable element of a grid cell.
///
/// Only valid for the page instance it was read from. A reload or navigation
/// invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationHandle {
    pub locator: Locator,
}

impl ActivationHandle {
    /// Link inside the `column`-th (1-based) `td` of the row with id `row_id`.
    pub fn for_cell(row_id: &str, column: usize, link_selector: &str) -> Self {
        Self {
            locator: Locator::owned_css(format!(
                "tr[id='{}'] > td:nth-of-type({}) {}",
                row_id, column, link_selector
            )),
        }
    }
}

/// An available (category, date) pair found by a single scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub category: String,
    pub date: String,
    pub handle: ActivationHandle,
    pub detected_at: DateTime<Local>,
}

impl CandidateSlot {
    pub fn new(category: impl Into<String>, date: impl Into<String>, handle: ActivationHandle) -> Self {
        Self {
            category: category.into(),
            date: date.into(),
            handle,
            detected_at: Local::now(),
        }
    }
}
