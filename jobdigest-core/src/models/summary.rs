use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Ok,
    FetchFailed,
    SummarizeFailed,
    TimedOut,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Ok => "ok",
            SummaryStatus::FetchFailed => "fetch_failed",
            SummaryStatus::SummarizeFailed => "summarize_failed",
            SummaryStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record is not `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Network,
    Auth,
    NotFound,
    Timeout,
    UpstreamError,
    EmptyContent,
    MalformedResponse,
    CycleTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Network => "network",
            FailureReason::Auth => "auth",
            FailureReason::NotFound => "not_found",
            FailureReason::Timeout => "timeout",
            FailureReason::UpstreamError => "upstream_error",
            FailureReason::EmptyContent => "empty_content",
            FailureReason::MalformedResponse => "malformed_response",
            FailureReason::CycleTimeout => "cycle_timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of output: one per distinct link attempted in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub url: String,
    pub title: String,
    pub company: Option<String>,
    pub summary_text: String,
    pub status: SummaryStatus,
    /// Present exactly when `status` is not `ok`.
    pub reason: Option<FailureReason>,
    #[serde(skip)]
    pub discovery_index: usize,
}

impl SummaryRecord {
    pub fn ok(
        url: impl Into<String>,
        title: impl Into<String>,
        company: Option<String>,
        summary_text: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            company,
            summary_text: summary_text.into(),
            status: SummaryStatus::Ok,
            reason: None,
            discovery_index: 0,
        }
    }

    pub fn failed(
        url: impl Into<String>,
        status: SummaryStatus,
        reason: FailureReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            company: None,
            summary_text: detail.into(),
            status,
            reason: Some(reason),
            discovery_index: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_discovery_index(mut self, index: usize) -> Self {
        self.discovery_index = index;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == SummaryStatus::Ok
    }
}
