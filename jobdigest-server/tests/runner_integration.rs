//! Cycle runner tests: delivery, empty cycles, outbox retention, non-overlap.

mod common;

use std::time::Duration;

use common::{listing_page, message, MemoryInbox, PipelineParts, RecordingSender};
use jobdigest_server::subsystems::pipeline::CycleError;
use jobdigest_server::subsystems::runner::DeliveryOutcome;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_empty_cycle_still_sends_report() {
    let sender = RecordingSender::new();
    let runner = PipelineParts::new(MemoryInbox::new(vec![])).runner(sender.clone(), true);

    let summary = runner.run_once().await.expect("cycle");
    assert_eq!(summary.messages_scanned, 0);
    assert_eq!(summary.delivery, DeliveryOutcome::Delivered);

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (to, subject, report) = &sent[0];
    assert_eq!(to, "me@example.com");
    assert!(subject.starts_with("New Job Listings Summary - "));
    assert!(report.text.contains("No job listings found"));
}

#[tokio::test]
async fn test_empty_cycle_skipped_when_configured() {
    let sender = RecordingSender::new();
    let runner = PipelineParts::new(MemoryInbox::new(vec![])).runner(sender.clone(), false);

    let summary = runner.run_once().await.expect("cycle");
    assert_eq!(summary.delivery, DeliveryOutcome::Skipped);
    assert_eq!(sender.sent_count(), 0);
}

#[tokio::test]
async fn test_report_with_listings_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page("Engineer")))
        .mount(&server)
        .await;

    let sender = RecordingSender::new();
    let inbox = MemoryInbox::new(vec![message("m1", 1, &format!("{}/jobs/1", server.uri()))]);
    let runner = PipelineParts::new(inbox).runner(sender.clone(), false);

    let summary = runner.run_once().await.expect("cycle");
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.delivery, DeliveryOutcome::Delivered);

    let sent = sender.sent.lock().unwrap();
    assert!(sent[0].2.text.contains("| Acme | Backend Engineer | ok |"));
    assert!(sent[0].2.html.contains("<td>Acme</td>"));
}

#[tokio::test]
async fn test_failed_delivery_is_retained_and_sent_next_cycle() {
    let sender = RecordingSender::failing(1);
    let runner = PipelineParts::new(MemoryInbox::new(vec![])).runner(sender.clone(), true);

    let first = runner.run_once().await.expect("cycle");
    assert_eq!(first.delivery, DeliveryOutcome::Retained);
    assert_eq!(runner.outbox_len().await, 1);
    assert_eq!(sender.sent_count(), 0);

    let second = runner.run_once().await.expect("cycle");
    assert_eq!(second.delivery, DeliveryOutcome::Delivered);
    assert_eq!(runner.outbox_len().await, 0);

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    // Retained report goes out first, then the new one.
    assert_eq!(sent[0].2.cycle_id, first.cycle_id);
    assert_eq!(sent[1].2.cycle_id, second.cycle_id);
}

#[tokio::test]
async fn test_manual_flush_delivers_retained_reports() {
    let sender = RecordingSender::failing(1);
    let runner = PipelineParts::new(MemoryInbox::new(vec![])).runner(sender.clone(), true);

    runner.run_once().await.expect("cycle");
    assert_eq!(runner.outbox_len().await, 1);

    let result = runner.flush_outbox().await;
    assert_eq!(result.delivered, 1);
    assert_eq!(result.remaining, 0);
    assert_eq!(sender.sent_count(), 1);
}

#[tokio::test]
async fn test_concurrent_trigger_returns_already_running() {
    let sender = RecordingSender::new();
    let inbox = MemoryInbox::slow(vec![], Duration::from_millis(300));
    let runner = PipelineParts::new(inbox).runner(sender.clone(), true);

    let (first, second) = tokio::join!(runner.run_once(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runner.is_running());
        runner.run_once().await
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(CycleError::AlreadyRunning)));
    assert_eq!(sender.sent_count(), 1);
    assert!(!runner.is_running());
}

#[tokio::test]
async fn test_inbox_failure_is_recorded_and_nothing_sent() {
    let sender = RecordingSender::new();
    let runner = PipelineParts::new(MemoryInbox::unavailable()).runner(sender.clone(), true);

    let result = runner.run_once().await;
    assert!(matches!(result, Err(CycleError::InboxUnavailable(_))));
    assert_eq!(sender.sent_count(), 0);
    assert!(runner.last_error().unwrap().contains("mailbox offline"));
    assert!(runner.last_cycle().is_none());
}
