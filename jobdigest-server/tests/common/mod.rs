//! Shared fixtures: in-memory collaborators with call counters.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jobdigest_core::config::{FetchConfig, PipelineConfig, ReportConfig, SummarizerConfig};
use jobdigest_core::models::{Checkpoint, RawMessage, RenderedReport};
use jobdigest_core::{
    AuthContext, AuthError, AuthProvider, DeliveryError, EmailSender, InboxError, InboxSource,
    LanguageModel, LlmError,
};
use jobdigest_server::subsystems::fetcher::{ContentFetcher, LoginWallDetector};
use jobdigest_server::subsystems::pipeline::Pipeline;
use jobdigest_server::subsystems::report::ReportRenderer;
use jobdigest_server::subsystems::runner::CycleRunner;
use jobdigest_server::subsystems::summarizer::Summarizer;

// ============================================================================
// Inbox
// ============================================================================

pub struct MemoryInbox {
    messages: Vec<RawMessage>,
    pub checkpoint: Mutex<Checkpoint>,
    pub advance_calls: AtomicUsize,
    unavailable: bool,
    list_delay: Duration,
}

impl MemoryInbox {
    pub fn new(messages: Vec<RawMessage>) -> Arc<Self> {
        Arc::new(Self::build(messages, false, Duration::ZERO))
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::build(vec![], true, Duration::ZERO))
    }

    pub fn slow(messages: Vec<RawMessage>, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(messages, false, delay))
    }

    fn build(messages: Vec<RawMessage>, unavailable: bool, list_delay: Duration) -> Self {
        Self {
            messages,
            checkpoint: Mutex::new(Checkpoint::default()),
            advance_calls: AtomicUsize::new(0),
            unavailable,
            list_delay,
        }
    }

    pub fn current_checkpoint(&self) -> Checkpoint {
        self.checkpoint.lock().unwrap().clone()
    }
}

#[async_trait]
impl InboxSource for MemoryInbox {
    async fn checkpoint(&self) -> Result<Checkpoint, InboxError> {
        if self.unavailable {
            return Err(InboxError::Unavailable("mailbox offline".into()));
        }
        Ok(self.current_checkpoint())
    }

    async fn list_new_messages(&self, since: &Checkpoint) -> Result<Vec<RawMessage>, InboxError> {
        tokio::time::sleep(self.list_delay).await;
        if self.unavailable {
            return Err(InboxError::Unavailable("mailbox offline".into()));
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| m.is_after(since))
            .cloned()
            .collect())
    }

    async fn advance_checkpoint(&self, to: &Checkpoint) -> Result<(), InboxError> {
        self.advance_calls.fetch_add(1, Ordering::SeqCst);
        *self.checkpoint.lock().unwrap() = to.clone();
        Ok(())
    }
}

pub fn message(id: &str, minute: u32, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        received_at: Utc.with_ymd_and_hms(2024, 10, 1, 9, minute, 0).unwrap(),
        body: body.to_string(),
    }
}

// ============================================================================
// Auth
// ============================================================================

pub struct CountingAuth {
    pub calls: AtomicUsize,
}

impl CountingAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AuthProvider for CountingAuth {
    async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(AuthContext::with_cookie(domain, "session=abc"))
    }
}

// ============================================================================
// Language model
// ============================================================================

pub const SUMMARY_JSON: &str =
    r#"{"title": "Backend Engineer", "company": "Acme", "summary": "Builds payment services."}"#;

/// Answers summary prompts with `SUMMARY_JSON`; classification prompts with
/// "no" when the email mentions an invoice, otherwise "yes".
pub struct CountingModel {
    pub calls: AtomicUsize,
}

impl CountingModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for CountingModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("yes or no") {
            let answer = if prompt.to_lowercase().contains("invoice") { "no" } else { "yes" };
            return Ok(answer.to_string());
        }
        Ok(SUMMARY_JSON.to_string())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// A page that passes the summarizer's content gate.
pub fn listing_page(title: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1>\
         <h2>Responsibilities</h2><ul><li>{}</li></ul>\
         <h2>Requirements</h2><p>3+ years of experience with distributed systems.</p>\
         </body></html>",
        "Design, build and operate services that move money safely. ".repeat(4)
    )
}

// ============================================================================
// Email sender
// ============================================================================

pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String, RenderedReport)>>,
    failures_left: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Fails the first `n` sends.
    pub fn failing(n: usize) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(n),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        report: &RenderedReport,
    ) -> Result<(), DeliveryError> {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DeliveryError::Failed("smtp relay refused connection".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), report.clone()));
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        timeout_seconds: 5,
        max_retries: 2,
        retry_delay_ms: 1,
        max_bytes: 1024 * 1024,
        user_agent: "jobdigest-test".into(),
    }
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        worker_concurrency: 4,
        link_keywords: Vec::new(),
        ..PipelineConfig::default()
    }
}

pub struct PipelineParts {
    pub config: PipelineConfig,
    pub fetch: FetchConfig,
    pub inbox: Arc<MemoryInbox>,
    pub auth: Arc<CountingAuth>,
    pub model: Arc<CountingModel>,
    /// Allow-listed auth domains; wiremock listens on 127.0.0.1.
    pub protected: Vec<String>,
}

impl PipelineParts {
    pub fn new(inbox: Arc<MemoryInbox>) -> Self {
        Self {
            config: pipeline_config(),
            fetch: fast_fetch_config(),
            inbox,
            auth: CountingAuth::new(),
            model: CountingModel::new(),
            protected: Vec::new(),
        }
    }

    pub fn build(&self) -> Pipeline {
        let markers = vec!["sign in to view".to_string()];
        let fetcher = ContentFetcher::new(
            &self.fetch,
            self.auth.clone(),
            Arc::new(LoginWallDetector::new(&self.protected, &markers)),
        )
        .expect("fetcher");

        let summarizer_config = SummarizerConfig {
            retry_delay_ms: 1,
            ..SummarizerConfig::default()
        };
        let summarizer = Summarizer::new(self.model.clone(), &summarizer_config, &markers);

        Pipeline::new(
            self.config.clone(),
            self.inbox.clone(),
            Arc::new(fetcher),
            Arc::new(summarizer),
        )
    }

    pub fn runner(&self, sender: Arc<RecordingSender>, send_empty_reports: bool) -> CycleRunner {
        CycleRunner::new(
            self.build(),
            sender,
            ReportRenderer::new("New Job Listings Summary", &ReportConfig::default()),
            "me@example.com",
            send_empty_reports,
        )
    }
}
