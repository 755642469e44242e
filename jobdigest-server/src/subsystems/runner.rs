//! Cycle runner: owns the pipeline, delivery, and the outbox of undelivered
//! reports, and guarantees that cycles never overlap.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use jobdigest_core::models::{CycleReport, RenderedReport};
use jobdigest_core::EmailSender;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::pipeline::{CycleError, Pipeline};
use super::report::ReportRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// Empty cycle with `send_empty_reports = false`.
    Skipped,
    /// Report kept in the outbox.
    Retained,
}

/// What the status endpoint shows about the last completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub messages_scanned: usize,
    pub links_found: usize,
    pub links_dropped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub delivery: DeliveryOutcome,
}

impl CycleSummary {
    fn of(report: &CycleReport, delivery: DeliveryOutcome) -> Self {
        Self {
            cycle_id: report.cycle_id,
            started_at: report.cycle_started_at,
            ended_at: report.cycle_ended_at,
            messages_scanned: report.messages_scanned,
            links_found: report.links_found,
            links_dropped: report.links_dropped,
            succeeded: report.succeeded,
            failed: report.failed,
            delivery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    pub delivered: usize,
    pub remaining: usize,
}

const DEFAULT_OUTBOX_CAPACITY: usize = 10;

/// Rendered reports whose delivery failed, oldest first. In memory only and
/// bounded: once full, the oldest report is dropped to make room.
pub struct Outbox {
    reports: tokio::sync::Mutex<VecDeque<RenderedReport>>,
    capacity: usize,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: tokio::sync::Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Queue a report, returning the one evicted to stay within capacity.
    pub async fn push(&self, report: RenderedReport) -> Option<RenderedReport> {
        let mut queue = self.reports.lock().await;
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        if let Some(dropped) = &evicted {
            tracing::warn!(
                cycle_id = %dropped.cycle_id,
                capacity = self.capacity,
                "Outbox full, oldest undelivered report dropped"
            );
        }
        queue.push_back(report);
        evicted
    }

    pub async fn len(&self) -> usize {
        self.reports.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reports.lock().await.is_empty()
    }

    /// Try every retained report once; failures stay queued in their original order.
    /// Holding the lock across sends keeps two flushes from delivering the same report.
    pub async fn flush(&self, sender: &dyn EmailSender, to: &str) -> FlushResult {
        let mut queue = self.reports.lock().await;
        let mut kept = VecDeque::new();
        let mut delivered = 0;

        while let Some(report) = queue.pop_front() {
            match sender.send(to, &report.subject, &report).await {
                Ok(()) => {
                    delivered += 1;
                    tracing::info!(cycle_id = %report.cycle_id, "Retained report delivered");
                }
                Err(e) => {
                    tracing::warn!(cycle_id = %report.cycle_id, error = %e, "Retained report still undeliverable");
                    kept.push_back(report);
                }
            }
        }

        *queue = kept;
        FlushResult {
            delivered,
            remaining: queue.len(),
        }
    }
}

pub struct CycleRunner {
    pipeline: Pipeline,
    sender: Arc<dyn EmailSender>,
    renderer: ReportRenderer,
    recipient: String,
    send_empty_reports: bool,
    outbox: Outbox,
    running: tokio::sync::Mutex<()>,
    last_cycle: Mutex<Option<CycleSummary>>,
    last_error: Mutex<Option<String>>,
}

impl CycleRunner {
    pub fn new(
        pipeline: Pipeline,
        sender: Arc<dyn EmailSender>,
        renderer: ReportRenderer,
        recipient: impl Into<String>,
        send_empty_reports: bool,
    ) -> Self {
        Self {
            pipeline,
            sender,
            renderer,
            recipient: recipient.into(),
            send_empty_reports,
            outbox: Outbox::default(),
            running: tokio::sync::Mutex::new(()),
            last_cycle: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Bound on retained undelivered reports.
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox = Outbox::new(capacity);
        self
    }

    /// One full cycle: retry the outbox, run the pipeline, deliver.
    pub async fn run_once(&self) -> Result<CycleSummary, CycleError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("Cycle trigger ignored, a cycle is already running");
            return Err(CycleError::AlreadyRunning);
        };

        if !self.outbox.is_empty().await {
            self.flush_outbox().await;
        }

        let report = match self.pipeline.run_cycle().await {
            Ok(r) => r,
            Err(e) => {
                *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                return Err(e);
            }
        };

        let delivery = self.deliver(&report).await;
        let summary = CycleSummary::of(&report, delivery);

        *self.last_cycle.lock().unwrap_or_else(|p| p.into_inner()) = Some(summary.clone());
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(summary)
    }

    async fn deliver(&self, report: &CycleReport) -> DeliveryOutcome {
        if report.is_empty() && !self.send_empty_reports {
            tracing::info!(
                cycle_id = %report.cycle_id,
                messages = report.messages_scanned,
                "Empty cycle, report not sent (send_empty_reports = false)"
            );
            return DeliveryOutcome::Skipped;
        }

        let rendered = self.renderer.render(report);
        match self
            .sender
            .send(&self.recipient, &rendered.subject, &rendered)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    cycle_id = %report.cycle_id,
                    recipient = %self.recipient,
                    records = report.records.len(),
                    "Report delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                tracing::error!(
                    cycle_id = %report.cycle_id,
                    error = %e,
                    "Report delivery failed, kept in outbox for retry"
                );
                self.outbox.push(rendered).await;
                DeliveryOutcome::Retained
            }
        }
    }

    pub async fn flush_outbox(&self) -> FlushResult {
        self.outbox.flush(self.sender.as_ref(), &self.recipient).await
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn outbox_len(&self) -> usize {
        self.outbox.len().await
    }

    pub fn last_cycle(&self) -> Option<CycleSummary> {
        self.last_cycle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Periodic cycles until shutdown. Missed ticks are skipped, never queued.
pub async fn run_cycle_loop(
    runner: Arc<CycleRunner>,
    interval_minutes: u64,
    run_on_start: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    if !run_on_start {
        // First tick completes immediately.
        ticker.tick().await;
    }

    tracing::info!("Cycle loop started (interval: {}min)", interval_minutes);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match runner.run_once().await {
                    Ok(summary) => tracing::debug!(
                        cycle_id = %summary.cycle_id,
                        delivery = ?summary.delivery,
                        "Scheduled cycle complete"
                    ),
                    Err(CycleError::AlreadyRunning) => {
                        tracing::debug!("Scheduled cycle skipped, manual cycle in progress")
                    }
                    Err(e) => tracing::error!(error = %e, "Scheduled cycle failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Cycle loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobdigest_core::DeliveryError;

    /// Records subjects; fails while `down` is set.
    #[derive(Default)]
    struct Recorder {
        down: std::sync::atomic::AtomicBool,
        subjects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailSender for Recorder {
        async fn send(
            &self,
            _to: &str,
            subject: &str,
            _report: &RenderedReport,
        ) -> Result<(), DeliveryError> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DeliveryError::Failed("smtp down".into()));
            }
            self.subjects.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    fn report(n: usize) -> RenderedReport {
        RenderedReport {
            cycle_id: Uuid::new_v4(),
            subject: format!("report {n}"),
            text: String::new(),
            html: String::new(),
        }
    }

    #[tokio::test]
    async fn full_outbox_drops_oldest_report() {
        let outbox = Outbox::new(2);
        assert!(outbox.push(report(1)).await.is_none());
        assert!(outbox.push(report(2)).await.is_none());
        let evicted = outbox.push(report(3)).await.expect("oldest evicted");
        assert_eq!(evicted.subject, "report 1");
        assert_eq!(outbox.len().await, 2);

        let sender = Recorder::default();
        let result = outbox.flush(&sender, "me@example.com").await;
        assert_eq!(result, FlushResult { delivered: 2, remaining: 0 });
        assert_eq!(*sender.subjects.lock().unwrap(), vec!["report 2", "report 3"]);
    }

    #[tokio::test]
    async fn failed_flush_keeps_order_within_capacity() {
        let outbox = Outbox::new(3);
        for n in 1..=5 {
            outbox.push(report(n)).await;
        }

        let sender = Recorder::default();
        sender.down.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = outbox.flush(&sender, "me@example.com").await;
        assert_eq!(result, FlushResult { delivered: 0, remaining: 3 });

        sender.down.store(false, std::sync::atomic::Ordering::SeqCst);
        outbox.flush(&sender, "me@example.com").await;
        assert_eq!(
            *sender.subjects.lock().unwrap(),
            vec!["report 3", "report 4", "report 5"]
        );
    }
}
