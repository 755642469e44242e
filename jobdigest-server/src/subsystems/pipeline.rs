//! Pipeline Orchestrator: drives one cycle from inbox poll to `CycleReport`.
//!
//! Steps:
//! 1. Read checkpoint, list new messages (sorted, de-duplicated, capped)
//! 2. Optionally drop messages the model classifies as not job-related
//! 3. Extract links, merge across messages, cap at `max_links_per_cycle`
//! 4. Fetch + summarize each link on a bounded pool; failures become records
//! 5. Advance the checkpoint to the last message taken
//! 6. Build the report in first-discovery order
//!
//! Only inbox unavailability aborts a cycle. Everything that goes wrong with a
//! single link ends up in that link's record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use jobdigest_core::config::PipelineConfig;
use jobdigest_core::models::{
    Checkpoint, CycleReport, FailureReason, ListingLink, RawMessage, SummaryRecord, SummaryStatus,
};
use jobdigest_core::{InboxError, InboxSource};
use jobdigest_ingest::{merge_links, page_title, LinkExtractor};
use thiserror::Error;
use uuid::Uuid;

use super::context::CycleContext;
use super::fetcher::ContentFetcher;
use super::report::{build_report, CycleMeta};
use super::summarizer::Summarizer;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Inbox unavailable: {0}")]
    InboxUnavailable(String),

    #[error("A cycle is already running")]
    AlreadyRunning,
}

impl From<InboxError> for CycleError {
    fn from(e: InboxError) -> Self {
        match e {
            InboxError::Unavailable(msg) => CycleError::InboxUnavailable(msg),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    inbox: Arc<dyn InboxSource>,
    extractor: LinkExtractor,
    fetcher: Arc<ContentFetcher>,
    summarizer: Arc<Summarizer>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        inbox: Arc<dyn InboxSource>,
        fetcher: Arc<ContentFetcher>,
        summarizer: Arc<Summarizer>,
    ) -> Self {
        let extractor = LinkExtractor::new(&config.link_keywords);
        Self {
            config,
            inbox,
            extractor,
            fetcher,
            summarizer,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let started = Utc::now();
        let ctx = CycleContext::new(cycle_id, self.config.cycle_timeout());

        tracing::info!(cycle_id = %cycle_id, "Cycle started");

        // 1. Messages since the checkpoint
        let messages = match self.pull_messages().await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(cycle_id = %cycle_id, error = %e, "Cycle aborted, checkpoint not advanced");
                return Err(e);
            }
        };
        let next_checkpoint = messages.last().map(Checkpoint::at);

        // 2-3. Links, deduplicated across the whole cycle
        let mut per_message = Vec::with_capacity(messages.len());
        for message in &messages {
            if self.config.classify_messages && !self.is_job_email(message, cycle_id).await {
                continue;
            }
            per_message.push(self.extractor.extract(&message.id, &message.body));
        }
        let mut links = merge_links(per_message);
        let links_found = links.len();
        let links_dropped = links_found.saturating_sub(self.config.max_links_per_cycle);
        if links_dropped > 0 {
            tracing::warn!(
                cycle_id = %cycle_id,
                links_found,
                links_dropped,
                limit = self.config.max_links_per_cycle,
                "Link limit reached, excess links not processed"
            );
            links.truncate(self.config.max_links_per_cycle);
        }

        // 4. Per-link work
        let records = self.process_links(links, &ctx).await;

        // 5. Checkpoint only after every message has been through extraction
        if let Some(checkpoint) = next_checkpoint {
            if let Err(e) = self.inbox.advance_checkpoint(&checkpoint).await {
                tracing::error!(
                    cycle_id = %cycle_id,
                    error = %e,
                    "Failed to advance checkpoint, messages will be reprocessed next cycle"
                );
            }
        }

        // 6. Report
        let report = build_report(
            CycleMeta {
                cycle_id,
                messages_scanned: messages.len(),
                links_found,
                links_dropped,
                cycle_started_at: started,
            },
            records,
            Utc::now(),
        );

        tracing::info!(
            cycle_id = %cycle_id,
            messages = report.messages_scanned,
            links = report.links_found,
            succeeded = report.succeeded,
            failed = report.failed,
            "Cycle finished"
        );

        Ok(report)
    }

    async fn pull_messages(&self) -> Result<Vec<RawMessage>, CycleError> {
        let checkpoint = self.inbox.checkpoint().await?;
        let mut messages = self.inbox.list_new_messages(&checkpoint).await?;

        messages.retain(|m| m.is_after(&checkpoint));
        messages.sort_by(|a, b| (a.received_at, &a.id).cmp(&(b.received_at, &b.id)));
        let mut seen = HashSet::new();
        messages.retain(|m| seen.insert(m.id.clone()));
        messages.truncate(self.config.max_messages_per_cycle);

        Ok(messages)
    }

    /// Classification failures keep the message.
    async fn is_job_email(&self, message: &RawMessage, cycle_id: Uuid) -> bool {
        match self.summarizer.is_job_email(&message.body).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(cycle_id = %cycle_id, message_id = %message.id, "Message is not a job email, skipped");
                false
            }
            Err(e) => {
                tracing::warn!(cycle_id = %cycle_id, message_id = %message.id, error = %e, "Classification failed, keeping message");
                true
            }
        }
    }

    async fn process_links(&self, links: Vec<ListingLink>, ctx: &CycleContext) -> Vec<SummaryRecord> {
        let concurrency = self.config.worker_concurrency.max(1);
        stream::iter(links)
            .map(|link| self.process_link(link, ctx))
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Exactly one terminal record per link.
    async fn process_link(&self, link: ListingLink, ctx: &CycleContext) -> SummaryRecord {
        if ctx.deadline_passed() {
            return SummaryRecord::failed(
                link.url,
                SummaryStatus::TimedOut,
                FailureReason::CycleTimeout,
                "cycle deadline reached before this link was started",
            )
            .with_discovery_index(link.discovery_index);
        }

        let record = match self.fetcher.fetch(&link, ctx).await {
            Err(e) => {
                tracing::warn!(cycle_id = %ctx.cycle_id, url = %link.url, error = %e, "Fetch failed");
                SummaryRecord::failed(
                    link.url.clone(),
                    SummaryStatus::FetchFailed,
                    e.kind.reason(),
                    e.message,
                )
            }
            Ok(content) => match self.summarizer.summarize(&content).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(cycle_id = %ctx.cycle_id, url = %link.url, error = %e, "Summarize failed");
                    SummaryRecord::failed(
                        link.url.clone(),
                        SummaryStatus::SummarizeFailed,
                        e.kind.reason(),
                        e.message,
                    )
                    .with_title(page_title(&content.body).unwrap_or_default())
                }
            },
        };

        record.with_discovery_index(link.discovery_index)
    }
}
