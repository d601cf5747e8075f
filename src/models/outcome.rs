use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::CandidateSlot;

pub const UNKNOWN_TIME: &str = "Unknown";

/// Result of one booking attempt. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub success: bool,
    pub category: String,
    pub date: String,
    pub selected_time: String,
    pub error_detail: Option<String>,
    pub elapsed: Duration,
}

impl BookingOutcome {
    pub fn locked(slot: &CandidateSlot, selected_time: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            category: slot.category.clone(),
            date: slot.date.clone(),
            selected_time: selected_time.into(),
            error_detail: None,
            elapsed,
        }
    }

    pub fn failed(
        slot: &CandidateSlot,
        selected_time: Option<String>,
        error_detail: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            category: slot.category.clone(),
            date: slot.date.clone(),
            selected_time: selected_time.unwrap_or_else(|| UNKNOWN_TIME.to_string()),
            error_detail: Some(error_detail.into()),
            elapsed,
        }
    }
}
