//! Auth Provider capability.
//!
//! An `AuthContext` is the set of headers (usually a `Cookie`) that turns an
//! anonymous request into an authenticated one for a single domain. Providers
//! only obtain contexts; when and how often to ask is the fetcher's business.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::{redirect, Client};
use thiserror::Error;

use crate::config::{AuthConfig, CookieLoginConfig, FormLoginConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub domain: String,
    pub headers: Vec<(String, String)>,
}

impl AuthContext {
    pub fn with_cookie(domain: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            headers: vec![("Cookie".to_string(), cookie.into())],
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication failed for {domain}: {message}")]
    Failed { domain: String, message: String },
}

impl AuthError {
    pub fn failed(domain: &str, message: impl Into<String>) -> Self {
        AuthError::Failed {
            domain: domain.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError>;
}

/// True when `host` is `domain` or one of its subdomains.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

// ============================================================================
// Form login
// ============================================================================

/// Posts username/password to a login form and keeps the session cookies it sets.
pub struct FormLoginAuthProvider {
    client: Client,
    config: FormLoginConfig,
}

impl FormLoginAuthProvider {
    pub fn new(config: FormLoginConfig, timeout: Duration) -> Result<Self, AuthError> {
        // Session cookies arrive on the login redirect itself, so it must not be followed.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::failed(&config.domain, e.to_string()))?;
        Ok(Self { client, config })
    }

    fn credentials(&self) -> Result<(String, String), AuthError> {
        let read = |var: &str| {
            std::env::var(var).map_err(|_| {
                AuthError::failed(&self.config.domain, format!("{} is not set", var))
            })
        };
        Ok((read(&self.config.username_env)?, read(&self.config.password_env)?))
    }
}

#[async_trait]
impl AuthProvider for FormLoginAuthProvider {
    async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError> {
        let (username, password) = self.credentials()?;
        let form = [
            (self.config.username_field.as_str(), username.as_str()),
            (self.config.password_field.as_str(), password.as_str()),
        ];

        tracing::info!(domain = %domain, login_url = %self.config.login_url, "Submitting login form");

        let response = self
            .client
            .post(&self.config.login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::failed(domain, e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(AuthError::failed(domain, format!("login returned {}", status)));
        }

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| pair.contains('=') && !pair.ends_with('='))
            .collect();

        if cookies.is_empty() {
            return Err(AuthError::failed(domain, "login set no session cookies"));
        }

        Ok(AuthContext::with_cookie(domain, cookies.join("; ")))
    }
}

// ============================================================================
// Static cookie
// ============================================================================

/// Uses a pre-issued session cookie taken from the environment.
pub struct StaticCookieAuthProvider {
    config: CookieLoginConfig,
}

impl StaticCookieAuthProvider {
    pub fn new(config: CookieLoginConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AuthProvider for StaticCookieAuthProvider {
    async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError> {
        match std::env::var(&self.config.cookie_env) {
            Ok(cookie) if !cookie.trim().is_empty() => {
                Ok(AuthContext::with_cookie(domain, cookie.trim()))
            }
            _ => Err(AuthError::failed(
                domain,
                format!("{} is not set", self.config.cookie_env),
            )),
        }
    }
}

// ============================================================================
// Per-domain dispatch
// ============================================================================

/// Routes each domain to the provider configured for it (or for a parent domain).
#[derive(Default)]
pub struct DomainAuthProviders {
    providers: HashMap<String, Arc<dyn AuthProvider>>,
}

impl DomainAuthProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AuthConfig, timeout: Duration) -> Result<Self, AuthError> {
        let mut providers = Self::new();
        for login in &config.logins {
            let provider = FormLoginAuthProvider::new(login.clone(), timeout)?;
            providers.insert(&login.domain, Arc::new(provider));
        }
        for cookie in &config.cookies {
            providers.insert(
                &cookie.domain,
                Arc::new(StaticCookieAuthProvider::new(cookie.clone())),
            );
        }
        Ok(providers)
    }

    pub fn insert(&mut self, domain: &str, provider: Arc<dyn AuthProvider>) {
        self.providers.insert(domain.to_ascii_lowercase(), provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn provider_for(&self, domain: &str) -> Option<&Arc<dyn AuthProvider>> {
        // Longest configured match wins, so `jobs.example.com` beats `example.com`.
        self.providers
            .iter()
            .filter(|(configured, _)| domain_matches(domain, configured))
            .max_by_key(|(configured, _)| configured.len())
            .map(|(_, p)| p)
    }
}

#[async_trait]
impl AuthProvider for DomainAuthProviders {
    async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError> {
        match self.provider_for(domain) {
            Some(provider) => provider.get_authenticated_context(domain).await,
            None => Err(AuthError::failed(domain, "no credentials configured")),
        }
    }
}
