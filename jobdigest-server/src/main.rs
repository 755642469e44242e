use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use jobdigest_core::llm::LlmConfig;
use jobdigest_core::{
    DigestConfig, DomainAuthProviders, OpenAiChatClient, SmtpEmailSender, SpoolDirInbox,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use jobdigest_server::subsystems::fetcher::{ContentFetcher, LoginWallDetector};
use jobdigest_server::subsystems::pipeline::Pipeline;
use jobdigest_server::subsystems::report::ReportRenderer;
use jobdigest_server::subsystems::runner::{run_cycle_loop, CycleRunner};
use jobdigest_server::subsystems::summarizer::Summarizer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "jobdigest.toml")]
    config: String,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

fn build_runner(config: &DigestConfig) -> anyhow::Result<CycleRunner> {
    let inbox = Arc::new(SpoolDirInbox::new(
        config.inbox.spool_path(),
        config.inbox.checkpoint_file(),
    ));

    let auth = DomainAuthProviders::from_config(&config.auth, config.fetch.timeout())
        .context("auth providers")?;
    if auth.is_empty() && !config.auth.domains.is_empty() {
        tracing::warn!(
            domains = ?config.auth.domains,
            "No [[auth.logins]] or [[auth.cookies]] configured; protected listings will fail with auth"
        );
    }

    let fetcher = ContentFetcher::new(
        &config.fetch,
        Arc::new(auth),
        Arc::new(LoginWallDetector::from_config(&config.auth)),
    )
    .context("content fetcher")?;

    let model = OpenAiChatClient::new(LlmConfig::from_summarizer(&config.summarizer))
        .with_context(|| format!("language model (is {} set?)", config.summarizer.api_key_env))?;
    let summarizer = Summarizer::new(Arc::new(model), &config.summarizer, &config.auth.login_markers);

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        inbox,
        Arc::new(fetcher),
        Arc::new(summarizer),
    );

    let sender = SmtpEmailSender::from_config(&config.delivery).context("email sender")?;

    Ok(CycleRunner::new(
        pipeline,
        Arc::new(sender),
        ReportRenderer::new(config.delivery.subject_prefix.clone(), &config.report),
        config.delivery.recipient.clone(),
        config.pipeline.send_empty_reports,
    )
    .with_outbox_capacity(config.delivery.max_retained_reports))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match DigestConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over service.log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if let Err(e) = config.validate() {
        eprintln!("Invalid config {}: {}", args.config, e);
        std::process::exit(1);
    }

    if args.check_config {
        println!("✅ {} is valid", args.config);
        return Ok(());
    }

    let runner = Arc::new(build_runner(&config)?);

    if args.once {
        let summary = runner.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.http.enabled {
        let http_runner = runner.clone();
        let http_config = config.http.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                jobdigest_server::http::start_http_server(http_runner, http_config, http_shutdown)
                    .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    run_cycle_loop(
        runner,
        config.service.interval_minutes,
        config.service.run_on_start,
        tx.subscribe(),
    )
    .await;

    // Give the HTTP server a moment to finish in-flight requests.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
