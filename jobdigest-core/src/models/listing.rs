use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized listing URL and where it was first seen in the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingLink {
    pub url: String,
    pub source_message_id: String,
    /// First-discovery position within the cycle; report rows are ordered by it.
    pub discovery_index: usize,
}

/// Fetched page for a listing. Lives only for the duration of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingContent {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub body: String,
    pub auth_used: bool,
}
