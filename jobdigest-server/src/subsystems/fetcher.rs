//! Content Fetcher: retrieves listing pages, authenticating when a known
//! protected domain answers with a login wall.
//!
//! Flow for one link:
//! 1. Anonymous GET (transport errors, 408, 429 and 5xx retried by the fetch `RetryPolicy`)
//! 2. If the `AuthRequirement` strategy says the page is a login wall, take the
//!    domain's session from the `CycleContext` and GET once more with it
//! 3. A session that still lands on a login wall disables the domain for the cycle

use std::fmt;
use std::sync::Arc;

use jobdigest_core::auth::domain_matches;
use jobdigest_core::config::{AuthConfig, FetchConfig};
use jobdigest_core::models::{FailureReason, ListingContent, ListingLink};
use jobdigest_core::{AuthContext, AuthProvider, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use thiserror::Error;
use url::Url;

use super::context::CycleContext;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Auth,
    NotFound,
    Timeout,
}

impl FetchErrorKind {
    pub fn reason(&self) -> FailureReason {
        match self {
            FetchErrorKind::Network => FailureReason::Network,
            FetchErrorKind::Auth => FailureReason::Auth,
            FetchErrorKind::NotFound => FailureReason::NotFound,
            FetchErrorKind::Timeout => FailureReason::Timeout,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason().as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Network | FetchErrorKind::Timeout)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::new(FetchErrorKind::Timeout, e.to_string())
    } else {
        FetchError::new(FetchErrorKind::Network, e.to_string())
    }
}

// ============================================================================
// Auth-required detection strategy
// ============================================================================

/// What a response looked like, as seen by an `AuthRequirement`.
pub struct PageProbe<'a> {
    pub requested: &'a Url,
    /// URL after redirects.
    pub final_url: &'a Url,
    pub status: u16,
    pub body: &'a str,
}

/// Decides which domains need a session and whether a response is a login wall.
pub trait AuthRequirement: Send + Sync {
    /// Auth-table key for `host` when it belongs to a protected domain.
    fn auth_domain(&self, host: &str) -> Option<String>;

    fn is_login_wall(&self, page: &PageProbe<'_>) -> bool;
}

const LOGIN_PATH_HINTS: &[&str] = &["login", "signin", "sign-in", "authwall", "checkpoint"];

/// Allow-list of protected domains plus status, redirect and body heuristics.
pub struct LoginWallDetector {
    domains: Vec<String>,
    markers: Vec<String>,
}

impl LoginWallDetector {
    pub fn new(domains: &[String], markers: &[String]) -> Self {
        Self {
            domains: domains.iter().map(|d| d.to_ascii_lowercase()).collect(),
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.domains, &config.login_markers)
    }
}

impl AuthRequirement for LoginWallDetector {
    fn auth_domain(&self, host: &str) -> Option<String> {
        self.domains
            .iter()
            .filter(|d| domain_matches(host, d))
            .max_by_key(|d| d.len())
            .cloned()
    }

    fn is_login_wall(&self, page: &PageProbe<'_>) -> bool {
        if is_auth_status(page.status) {
            return true;
        }

        let redirected_to_login = page.final_url.path() != page.requested.path() && {
            let path = page.final_url.path().to_ascii_lowercase();
            LOGIN_PATH_HINTS.iter().any(|hint| path.contains(hint))
        };
        if redirected_to_login {
            return true;
        }

        let body = page.body.to_lowercase();
        self.markers.iter().any(|m| body.contains(m.as_str()))
    }
}

fn is_auth_status(status: u16) -> bool {
    // 999 is what LinkedIn answers to unauthenticated scrapers.
    matches!(status, 401 | 403 | 999)
}

// ============================================================================
// ContentFetcher
// ============================================================================

struct Page {
    status: u16,
    final_url: Url,
    body: String,
}

pub struct ContentFetcher {
    client: Client,
    auth: Arc<dyn AuthProvider>,
    detector: Arc<dyn AuthRequirement>,
    retry: RetryPolicy,
    max_bytes: usize,
}

impl ContentFetcher {
    pub fn new(
        config: &FetchConfig,
        auth: Arc<dyn AuthProvider>,
        detector: Arc<dyn AuthRequirement>,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            client,
            auth,
            detector,
            retry: RetryPolicy::new(config.max_retries, config.retry_delay_ms),
            max_bytes: config.max_bytes,
        })
    }

    pub async fn fetch(
        &self,
        link: &ListingLink,
        ctx: &CycleContext,
    ) -> Result<ListingContent, FetchError> {
        let url = Url::parse(&link.url)
            .map_err(|e| FetchError::new(FetchErrorKind::NotFound, format!("invalid url: {}", e)))?;

        let page = self.get_with_retry(&url, None).await?;

        let host = url.host_str().unwrap_or_default();
        if let Some(domain) = self.detector.auth_domain(host) {
            if self.detector.is_login_wall(&probe(&url, &page)) {
                tracing::debug!(url = %link.url, domain = %domain, status = page.status, "Login wall detected");
                return self.fetch_authenticated(link, &url, &domain, ctx).await;
            }
        }

        check_status(page.status)?;
        Ok(content(link, page, false))
    }

    async fn fetch_authenticated(
        &self,
        link: &ListingLink,
        url: &Url,
        domain: &str,
        ctx: &CycleContext,
    ) -> Result<ListingContent, FetchError> {
        let Some(session) = ctx.authenticate(domain, self.auth.as_ref()).await else {
            return Err(FetchError::new(
                FetchErrorKind::Auth,
                format!("no authenticated session for {} this cycle", domain),
            ));
        };

        let page = self.get_with_retry(url, Some(&session)).await?;

        if self.detector.is_login_wall(&probe(url, &page)) {
            ctx.mark_failed(domain).await;
            return Err(FetchError::new(
                FetchErrorKind::Auth,
                format!("authenticated request to {} still hit a login wall", domain),
            ));
        }

        check_status(page.status)?;
        tracing::debug!(url = %link.url, domain = %domain, "Fetched with authenticated session");
        Ok(content(link, page, true))
    }

    async fn get_with_retry(
        &self,
        url: &Url,
        session: Option<&AuthContext>,
    ) -> Result<Page, FetchError> {
        self.retry
            .run("fetch", || self.get(url, session), FetchError::is_retryable)
            .await
    }

    /// One GET. Statuses worth retrying come back as errors; everything else as a `Page`.
    async fn get(&self, url: &Url, session: Option<&AuthContext>) -> Result<Page, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(session) = session {
            for (name, value) in &session.headers {
                let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) else {
                    tracing::warn!(domain = %session.domain, header = %name, "Skipping invalid auth header");
                    continue;
                };
                request = request.header(name, value);
            }
        }

        let mut response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        if status == 408 || status == 429 || status >= 500 {
            return Err(FetchError::new(
                FetchErrorKind::Network,
                format!("{} returned {}", url, status),
            ));
        }

        let final_url = response.url().clone();

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            let room = self.max_bytes.saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if bytes.len() >= self.max_bytes {
                tracing::debug!(url = %url, max_bytes = self.max_bytes, "Response truncated");
                break;
            }
        }

        Ok(Page {
            status,
            final_url,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn probe<'a>(requested: &'a Url, page: &'a Page) -> PageProbe<'a> {
    PageProbe {
        requested,
        final_url: &page.final_url,
        status: page.status,
        body: &page.body,
    }
}

/// Terminal mapping for a non-retryable status.
fn check_status(status: u16) -> Result<(), FetchError> {
    match status {
        200..=299 => Ok(()),
        s if is_auth_status(s) => Err(FetchError::new(
            FetchErrorKind::Auth,
            format!("access denied ({})", s),
        )),
        s => Err(FetchError::new(
            FetchErrorKind::NotFound,
            format!("unexpected status {}", s),
        )),
    }
}

fn content(link: &ListingLink, page: Page, auth_used: bool) -> ListingContent {
    ListingContent {
        url: link.url.clone(),
        fetched_at: chrono::Utc::now(),
        body: page.body,
        auth_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobdigest_core::AuthError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubAuth {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for StubAuth {
        async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthContext::with_cookie(domain, "session=good"))
        }
    }

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            timeout_seconds: 5,
            max_retries: 2,
            retry_delay_ms: 1,
            max_bytes: 1024,
            user_agent: "jobdigest-test".into(),
        }
    }

    /// Wiremock serves on 127.0.0.1, so that is the protected "domain" in these tests.
    fn fetcher(auth: Arc<StubAuth>, protected: &[&str]) -> ContentFetcher {
        let domains: Vec<String> = protected.iter().map(|s| s.to_string()).collect();
        let markers = vec!["sign in to view".to_string()];
        ContentFetcher::new(
            &fetch_config(),
            auth,
            Arc::new(LoginWallDetector::new(&domains, &markers)),
        )
        .unwrap()
    }

    fn link(server: &MockServer, p: &str) -> ListingLink {
        ListingLink {
            url: format!("{}{}", server.uri(), p),
            source_message_id: "m".into(),
            discovery_index: 0,
        }
    }

    fn ctx() -> CycleContext {
        CycleContext::new(Uuid::new_v4(), Duration::from_secs(60))
    }

    fn stub_auth() -> Arc<StubAuth> {
        Arc::new(StubAuth {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn plain_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Engineer</h1>"))
            .mount(&server)
            .await;

        let content = fetcher(stub_auth(), &[])
            .fetch(&link(&server, "/jobs/1"), &ctx())
            .await
            .unwrap();
        assert_eq!(content.body, "<h1>Engineer</h1>");
        assert!(!content.auth_used);
    }

    #[tokio::test]
    async fn server_error_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let content = fetcher(stub_auth(), &[])
            .fetch(&link(&server, "/jobs/2"), &ctx())
            .await
            .unwrap();
        assert_eq!(content.body, "ok");
    }

    #[tokio::test]
    async fn not_found_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(stub_auth(), &[])
            .fetch(&link(&server, "/gone"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unlisted_domain_forbidden_fails_with_auth_without_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let auth = stub_auth();
        let err = fetcher(auth.clone(), &["linkedin.com"])
            .fetch(&link(&server, "/jobs/3"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Auth);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn login_wall_on_protected_domain_refetches_with_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("cookie", "session=good"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Real listing</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Sign in to view this job"))
            .mount(&server)
            .await;

        let auth = stub_auth();
        let content = fetcher(auth.clone(), &["127.0.0.1"])
            .fetch(&link(&server, "/jobs/4"), &ctx())
            .await
            .unwrap();
        assert!(content.auth_used);
        assert_eq!(content.body, "<p>Real listing</p>");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_session_disables_domain_for_the_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(999))
            .mount(&server)
            .await;

        let auth = stub_auth();
        let fetcher = fetcher(auth.clone(), &["127.0.0.1"]);
        let ctx = ctx();

        for p in ["/jobs/5", "/jobs/6", "/jobs/7"] {
            let err = fetcher.fetch(&link(&server, p), &ctx).await.unwrap_err();
            assert_eq!(err.kind, FetchErrorKind::Auth);
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5000)))
            .mount(&server)
            .await;

        let content = fetcher(stub_auth(), &[])
            .fetch(&link(&server, "/big"), &ctx())
            .await
            .unwrap();
        assert_eq!(content.body.len(), 1024);
    }

    #[test]
    fn redirect_to_login_path_is_a_login_wall() {
        let detector = LoginWallDetector::new(&["linkedin.com".to_string()], &[]);
        let requested = Url::parse("https://www.linkedin.com/jobs/view/1").unwrap();
        let final_url = Url::parse("https://www.linkedin.com/authwall?trk=x").unwrap();
        let page = PageProbe {
            requested: &requested,
            final_url: &final_url,
            status: 200,
            body: "",
        };
        assert!(detector.is_login_wall(&page));
        assert_eq!(
            detector.auth_domain("www.linkedin.com").as_deref(),
            Some("linkedin.com")
        );
        assert_eq!(detector.auth_domain("example.com"), None);
    }
}
