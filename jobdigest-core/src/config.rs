use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::DigestError;

#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub inbox: InboxConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
    pub interval_minutes: u64,
    pub run_on_start: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            interval_minutes: 720,
            run_on_start: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InboxConfig {
    pub spool_dir: String,
    pub checkpoint_path: String,
}

impl InboxConfig {
    pub fn spool_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.spool_dir).into_owned())
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.checkpoint_path).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_messages_per_cycle: usize,
    pub max_links_per_cycle: usize,
    pub worker_concurrency: usize,
    pub cycle_timeout_seconds: u64,
    pub send_empty_reports: bool,
    pub classify_messages: bool,
    pub link_keywords: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_messages_per_cycle: 50,
            max_links_per_cycle: 100,
            worker_concurrency: num_cpus::get().clamp(1, 8),
            cycle_timeout_seconds: 900,
            send_empty_reports: true,
            classify_messages: false,
            link_keywords: ["job", "career", "apply", "hiring", "recruit", "position"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PipelineConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            max_retries: 2,
            retry_delay_ms: 500,
            max_bytes: 2 * 1024 * 1024,
            user_agent: concat!("jobdigest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// Domains known to put listings behind a login. Subdomains match too.
    pub domains: Vec<String>,
    /// Case-insensitive phrases that identify a login wall. They are matched
    /// against visible page text as well as raw HTML, so keep them free of markup.
    pub login_markers: Vec<String>,
    pub logins: Vec<FormLoginConfig>,
    pub cookies: Vec<CookieLoginConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domains: vec!["linkedin.com".to_string()],
            login_markers: [
                "sign in to view",
                "join now to see",
                "please log in",
                "sign in to continue",
                "log in to continue",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            logins: Vec::new(),
            cookies: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormLoginConfig {
    pub domain: String,
    pub login_url: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    pub username_env: String,
    pub password_env: String,
}

fn default_username_field() -> String {
    "session_key".to_string()
}

fn default_password_field() -> String {
    "session_password".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CookieLoginConfig {
    pub domain: String,
    pub cookie_env: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub min_content_chars: usize,
    pub max_prompt_chars: usize,
    /// At least one of these must appear in the listing text before a model call is made.
    pub structural_markers: Vec<String>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_retries: 1,
            retry_delay_ms: 1000,
            timeout_seconds: 60,
            min_content_chars: 200,
            max_prompt_chars: 12_000,
            structural_markers: [
                "responsibilit",
                "requirement",
                "qualification",
                "experience",
                "skills",
                "salary",
                "apply",
                "role",
                "job",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    pub recipient: String,
    pub sender: String,
    pub smtp_host: String,
    #[serde(default = "default_smtp_user_env")]
    pub smtp_user_env: String,
    #[serde(default = "default_smtp_pass_env")]
    pub smtp_pass_env: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Undelivered reports kept for retry; the oldest is dropped beyond this.
    #[serde(default = "default_max_retained_reports")]
    pub max_retained_reports: usize,
}

fn default_smtp_user_env() -> String {
    "SMTP_USER".to_string()
}

fn default_smtp_pass_env() -> String {
    "SMTP_PASS".to_string()
}

fn default_subject_prefix() -> String {
    "New Job Listings Summary".to_string()
}

fn default_max_retained_reports() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportConfig {
    pub excerpt_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { excerpt_chars: 160 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl DigestConfig {
    /// Load from a TOML file, with `JOBDIGEST__SECTION__KEY` env overrides.
    pub fn load(path: &str) -> Result<Self, DigestError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("JOBDIGEST").separator("__"))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, DigestError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), DigestError> {
        if self.pipeline.max_messages_per_cycle == 0 {
            return Err(DigestError::InvalidConfig(
                "pipeline.max_messages_per_cycle must be > 0".into(),
            ));
        }
        if self.pipeline.max_links_per_cycle == 0 {
            return Err(DigestError::InvalidConfig(
                "pipeline.max_links_per_cycle must be > 0".into(),
            ));
        }
        if self.pipeline.worker_concurrency == 0 {
            return Err(DigestError::InvalidConfig(
                "pipeline.worker_concurrency must be > 0".into(),
            ));
        }
        if self.delivery.max_retained_reports == 0 {
            return Err(DigestError::InvalidConfig(
                "delivery.max_retained_reports must be > 0".into(),
            ));
        }
        if !self.delivery.recipient.contains('@') {
            return Err(DigestError::InvalidConfig(format!(
                "delivery.recipient is not an address: {}",
                self.delivery.recipient
            )));
        }
        Ok(())
    }
}
