//! Summarizer: turns a fetched listing page into a structured `SummaryRecord`
//! with one language-model call, after a cheap heuristic gate that rejects
//! pages which are obviously not listings.

use std::fmt;
use std::sync::Arc;

use jobdigest_core::config::SummarizerConfig;
use jobdigest_core::models::{FailureReason, ListingContent, SummaryRecord};
use jobdigest_core::{LanguageModel, LlmError, RetryPolicy};
use jobdigest_ingest::listing_text;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizeErrorKind {
    UpstreamError,
    EmptyContent,
    MalformedResponse,
}

impl SummarizeErrorKind {
    pub fn reason(&self) -> FailureReason {
        match self {
            SummarizeErrorKind::UpstreamError => FailureReason::UpstreamError,
            SummarizeErrorKind::EmptyContent => FailureReason::EmptyContent,
            SummarizeErrorKind::MalformedResponse => FailureReason::MalformedResponse,
        }
    }
}

impl fmt::Display for SummarizeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason().as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct SummarizeError {
    pub kind: SummarizeErrorKind,
    pub message: String,
}

impl SummarizeError {
    fn new(kind: SummarizeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<LlmError> for SummarizeError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Malformed(m) => SummarizeError::new(SummarizeErrorKind::MalformedResponse, m),
            other => SummarizeError::new(SummarizeErrorKind::UpstreamError, other.to_string()),
        }
    }
}

const SUMMARY_INSTRUCTION: &str = "Extract the job title, the hiring company and a short \
summary (2-3 sentences: role, key requirements, location or remote policy if stated) from \
the job listing below. Respond with only a JSON object of the form \
{\"title\": string, \"company\": string or null, \"summary\": string}.";

const CLASSIFY_INSTRUCTION: &str = "Does the following email announce or recommend one or \
more job openings? Answer with a single word: yes or no.";

#[derive(Debug, Deserialize)]
struct ModelSummary {
    title: Option<String>,
    company: Option<String>,
    summary: Option<String>,
}

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    min_content_chars: usize,
    max_prompt_chars: usize,
    structural_markers: Vec<String>,
    login_markers: Vec<String>,
}

impl Summarizer {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        config: &SummarizerConfig,
        login_markers: &[String],
    ) -> Self {
        Self {
            model,
            retry: RetryPolicy::new(config.max_retries, config.retry_delay_ms),
            min_content_chars: config.min_content_chars,
            max_prompt_chars: config.max_prompt_chars,
            structural_markers: config
                .structural_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            login_markers: login_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub async fn summarize(&self, content: &ListingContent) -> Result<SummaryRecord, SummarizeError> {
        let text = listing_text(&content.body);
        self.check_content(&text)?;

        let prompt = format!(
            "{}\n\n---\n{}",
            SUMMARY_INSTRUCTION,
            truncate_chars(&text, self.max_prompt_chars)
        );

        let response = self
            .retry
            .run("summarize", || self.model.complete(&prompt), LlmError::is_transient)
            .await?;

        let parsed = parse_summary(&response)?;
        tracing::debug!(url = %content.url, model = self.model.name(), "Listing summarized");
        Ok(SummaryRecord::ok(
            content.url.clone(),
            parsed.title,
            parsed.company,
            parsed.summary,
        ))
    }

    /// Heuristic gate: reject login walls, stubs and non-listing pages without a model call.
    fn check_content(&self, text: &str) -> Result<(), SummarizeError> {
        let chars = text.chars().count();
        if chars < self.min_content_chars {
            return Err(SummarizeError::new(
                SummarizeErrorKind::EmptyContent,
                format!("listing text too short ({} < {} chars)", chars, self.min_content_chars),
            ));
        }

        let lower = text.to_lowercase();
        if let Some(marker) = self.login_markers.iter().find(|m| lower.contains(m.as_str())) {
            return Err(SummarizeError::new(
                SummarizeErrorKind::EmptyContent,
                format!("page looks like a login wall (\"{}\")", marker),
            ));
        }

        if !self.structural_markers.is_empty()
            && !self.structural_markers.iter().any(|m| lower.contains(m.as_str()))
        {
            return Err(SummarizeError::new(
                SummarizeErrorKind::EmptyContent,
                "no listing structure found",
            ));
        }

        Ok(())
    }

    /// Yes/no pre-check of an email body. Errors are returned to the caller,
    /// which decides whether to keep the message.
    pub async fn is_job_email(&self, body: &str) -> Result<bool, LlmError> {
        let text = listing_text(body);
        let prompt = format!(
            "{}\n\n---\n{}",
            CLASSIFY_INSTRUCTION,
            truncate_chars(&text, self.max_prompt_chars)
        );
        let answer = self
            .retry
            .run("classify", || self.model.complete(&prompt), LlmError::is_transient)
            .await?;
        Ok(answer
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .starts_with("yes"))
    }
}

struct ParsedSummary {
    title: String,
    company: Option<String>,
    summary: String,
}

/// Parse the model's JSON, tolerating code fences and prose around the object.
fn parse_summary(response: &str) -> Result<ParsedSummary, SummarizeError> {
    let malformed = |msg: &str| SummarizeError::new(SummarizeErrorKind::MalformedResponse, msg);

    let start = response.find('{').ok_or_else(|| malformed("no JSON object in response"))?;
    let end = response.rfind('}').ok_or_else(|| malformed("no JSON object in response"))?;
    if end < start {
        return Err(malformed("no JSON object in response"));
    }

    let raw: ModelSummary = serde_json::from_str(&response[start..=end])
        .map_err(|e| malformed(&format!("invalid JSON: {}", e)))?;

    let non_blank = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let title = non_blank(raw.title).ok_or_else(|| malformed("missing title"))?;
    let summary = non_blank(raw.summary).ok_or_else(|| malformed("missing summary"))?;
    let company = non_blank(raw.company).filter(|c| {
        !matches!(c.to_ascii_lowercase().as_str(), "null" | "unknown" | "n/a")
    });

    Ok(ParsedSummary {
        title,
        company,
        summary,
    })
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
