//! jobdigest-cli: operator frontend for a running jobdigest-server.
//!
//! # Subcommands
//! - `status [--json]`          : last cycle, outbox depth, last error
//! - `run [--json]`             : trigger a cycle now (POST /cycle)
//! - `flush [--json]`           : retry retained reports (POST /outbox/flush)
//! - `extract <FILE> [-k KW]`   : print the listing links found in a saved email, offline

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use jobdigest_core::parse_email;
use jobdigest_ingest::LinkExtractor;
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "jobdigest-cli", version, about = "Job listing digest control CLI")]
struct Cli {
    /// jobdigest HTTP server URL (overrides JOBDIGEST_HTTP_URL env var)
    #[arg(long, env = "JOBDIGEST_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the last cycle and outbox state
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Run a digest cycle immediately
    Run {
        #[arg(long)]
        json: bool,
    },

    /// Retry delivery of retained reports
    Flush {
        #[arg(long)]
        json: bool,
    },

    /// Extract listing links from a saved email body without contacting the server
    Extract {
        /// Path to an .eml / .html / .txt file
        file: PathBuf,

        /// Only keep URLs containing one of these keywords (repeatable)
        #[arg(short = 'k', long = "keyword")]
        keywords: Vec<String>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

/// Mirrors the server's per-cycle summary.
#[derive(Debug, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub messages_scanned: usize,
    pub links_found: usize,
    pub links_dropped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub delivery: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub outbox: usize,
    pub last_cycle: Option<CycleSummary>,
    pub last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FlushResponse {
    pub delivered: usize,
    pub remaining: usize,
}

/// One-line human rendering of a cycle summary.
fn format_summary(s: &CycleSummary) -> String {
    let mut line = format!(
        "cycle {} : {} messages, {} links, {} ok, {} failed, report {}",
        short_id(&s.cycle_id),
        s.messages_scanned,
        s.links_found,
        s.succeeded,
        s.failed,
        s.delivery
    );
    if s.links_dropped > 0 {
        line.push_str(&format!(" ({} links over the cycle limit)", s.links_dropped));
    }
    line
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout: Duration) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder().timeout(timeout).build()?)
}

/// Send a request and return the JSON body, exiting on transport or HTTP errors.
fn call(req: reqwest::blocking::RequestBuilder, url: &str) -> anyhow::Result<serde_json::Value> {
    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("jobdigest-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        let detail = body["error"].as_str().unwrap_or("no detail");
        eprintln!("jobdigest-cli: server returned {}: {}", status, detail);
        std::process::exit(1);
    }

    Ok(resp.json()?)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn do_status(server: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/status", server);
    let body = call(client(Duration::from_secs(10))?.get(&url), &url)?;
    if json_output {
        return print_json(&body);
    }

    let status: StatusResponse = serde_json::from_value(body)?;
    println!("Running:    {}", if status.running { "yes" } else { "no" });
    println!("Outbox:     {} retained", status.outbox);
    match &status.last_cycle {
        Some(s) => println!("Last cycle: {} (ended {})", format_summary(s), s.ended_at),
        None => println!("Last cycle: none yet"),
    }
    if let Some(err) = &status.last_error {
        println!("Last error: {}", err);
    }
    Ok(())
}

fn do_run(server: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/cycle", server);
    // A cycle can take as long as the server's cycle timeout.
    let body = call(client(Duration::from_secs(30 * 60))?.post(&url), &url)?;
    if json_output {
        return print_json(&body);
    }

    let summary: CycleSummary = serde_json::from_value(body)?;
    println!("{}", format_summary(&summary));
    Ok(())
}

fn do_flush(server: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/outbox/flush", server);
    let body = call(client(Duration::from_secs(120))?.post(&url), &url)?;
    if json_output {
        return print_json(&body);
    }

    let result: FlushResponse = serde_json::from_value(body)?;
    println!(
        "Delivered {} report(s), {} still retained",
        result.delivered, result.remaining
    );
    Ok(())
}

// ============================================================================
// Offline extraction
// ============================================================================

fn extract_lines(body: &str, keywords: &[String]) -> Vec<String> {
    LinkExtractor::new(keywords)
        .extract("local", body)
        .into_iter()
        .map(|link| format!("{:>3}  {}", link.discovery_index, link.url))
        .collect()
}

/// Scannable body of a saved message; `.eml` files get their MIME parts decoded.
fn message_body(file: &Path, bytes: &[u8]) -> String {
    let is_eml = file.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));
    if is_eml {
        parse_email(bytes).body
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn do_extract(file: &PathBuf, keywords: &[String]) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", file.display(), e))?;
    let body = message_body(file, &bytes);

    let lines = extract_lines(&body, keywords);
    if lines.is_empty() {
        eprintln!("No listing links found in {}", file.display());
        return Ok(());
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match &cli.command {
        Commands::Status { json } => do_status(&server, *json),
        Commands::Run { json } => do_run(&server, *json),
        Commands::Flush { json } => do_flush(&server, *json),
        Commands::Extract { file, keywords } => do_extract(file, keywords),
    };

    if let Err(e) = result {
        eprintln!("jobdigest-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
