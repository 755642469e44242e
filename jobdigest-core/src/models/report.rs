use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::summary::SummaryRecord;

/// Everything one cycle produced, in first-discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub records: Vec<SummaryRecord>,
    pub messages_scanned: usize,
    pub links_found: usize,
    pub links_dropped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_ended_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A report rendered for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub cycle_id: Uuid,
    pub subject: String,
    pub text: String,
    pub html: String,
}
