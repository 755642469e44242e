//! Report Builder: one `CycleReport` per cycle, rendered as a Markdown-style
//! text table and an HTML table for the two parts of the digest email.

use chrono::{DateTime, Utc};
use jobdigest_core::config::ReportConfig;
use jobdigest_core::models::{CycleReport, RenderedReport, SummaryRecord};
use uuid::Uuid;

/// Cycle metadata gathered by the orchestrator before the records are in.
#[derive(Debug, Clone)]
pub struct CycleMeta {
    pub cycle_id: Uuid,
    pub messages_scanned: usize,
    pub links_found: usize,
    pub links_dropped: usize,
    pub cycle_started_at: DateTime<Utc>,
}

/// Assemble the report; rows are put back in first-discovery order.
pub fn build_report(
    meta: CycleMeta,
    mut records: Vec<SummaryRecord>,
    cycle_ended_at: DateTime<Utc>,
) -> CycleReport {
    records.sort_by_key(|r| r.discovery_index);
    let succeeded = records.iter().filter(|r| r.is_ok()).count();
    let failed = records.len() - succeeded;

    CycleReport {
        cycle_id: meta.cycle_id,
        records,
        messages_scanned: meta.messages_scanned,
        links_found: meta.links_found,
        links_dropped: meta.links_dropped,
        succeeded,
        failed,
        cycle_started_at: meta.cycle_started_at,
        cycle_ended_at,
    }
}

const EMPTY_NOTICE: &str = "No job listings found in this cycle.";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct ReportRenderer {
    subject_prefix: String,
    excerpt_chars: usize,
}

impl ReportRenderer {
    pub fn new(subject_prefix: impl Into<String>, config: &ReportConfig) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
            excerpt_chars: config.excerpt_chars,
        }
    }

    pub fn render(&self, report: &CycleReport) -> RenderedReport {
        RenderedReport {
            cycle_id: report.cycle_id,
            subject: self.subject(report),
            text: self.render_text(report),
            html: self.render_html(report),
        }
    }

    pub fn subject(&self, report: &CycleReport) -> String {
        format!(
            "{} - {}",
            self.subject_prefix,
            report.cycle_started_at.format(TIME_FORMAT)
        )
    }

    fn metadata_lines(report: &CycleReport) -> Vec<String> {
        vec![
            format!("Cycle: {}", report.cycle_id),
            format!("Started: {} UTC", report.cycle_started_at.format(TIME_FORMAT)),
            format!("Finished: {} UTC", report.cycle_ended_at.format(TIME_FORMAT)),
            format!("Messages scanned: {}", report.messages_scanned),
            format!(
                "Links found: {} (over limit, not processed: {})",
                report.links_found, report.links_dropped
            ),
            format!("Succeeded: {}, failed: {}", report.succeeded, report.failed),
        ]
    }

    pub fn render_text(&self, report: &CycleReport) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.subject_prefix));
        for line in Self::metadata_lines(report) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');

        if report.is_empty() {
            out.push_str(EMPTY_NOTICE);
            out.push('\n');
            return out;
        }

        out.push_str("| URL | Company | Title | Status | Summary |\n");
        out.push_str("|-----|---------|-------|--------|---------|\n");
        for r in &report.records {
            let row = Row::of(r, self.excerpt_chars);
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                table_cell(&r.url),
                table_cell(&row.company),
                table_cell(&r.title),
                row.status,
                table_cell(&row.excerpt),
            ));
        }
        out
    }

    pub fn render_html(&self, report: &CycleReport) -> String {
        let esc = |s: &str| html_escape::encode_text(s).into_owned();

        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html><body>\n");
        out.push_str(&format!("<h2>{}</h2>\n<ul>\n", esc(&self.subject_prefix)));
        for line in Self::metadata_lines(report) {
            out.push_str(&format!("<li>{}</li>\n", esc(&line)));
        }
        out.push_str("</ul>\n");

        if report.is_empty() {
            out.push_str(&format!("<p>{}</p>\n</body></html>\n", esc(EMPTY_NOTICE)));
            return out;
        }

        out.push_str("<table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\n");
        out.push_str(
            "<tr><th>URL</th><th>Company</th><th>Title</th><th>Status</th><th>Summary</th></tr>\n",
        );
        for r in &report.records {
            let row = Row::of(r, self.excerpt_chars);
            out.push_str(&format!(
                "<tr><td><a href=\"{href}\">{url}</a></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                esc(&row.company),
                esc(&r.title),
                esc(&row.status),
                esc(&row.excerpt),
                href = html_escape::encode_double_quoted_attribute(&r.url),
                url = esc(&r.url),
            ));
        }
        out.push_str("</table>\n</body></html>\n");
        out
    }
}

struct Row {
    company: String,
    status: String,
    excerpt: String,
}

impl Row {
    fn of(record: &SummaryRecord, excerpt_chars: usize) -> Self {
        let status = match record.reason {
            Some(reason) => format!("{} ({})", record.status, reason),
            None => record.status.to_string(),
        };
        Self {
            company: record.company.clone().unwrap_or_default(),
            status,
            excerpt: excerpt(&record.summary_text, excerpt_chars),
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    if let Some(space) = cut.rfind(' ') {
        cut.truncate(space);
    }
    format!("{}...", cut.trim_end())
}

fn table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}
