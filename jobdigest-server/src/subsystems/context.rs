//! Per-cycle state shared by every link worker.
//!
//! One `CycleContext` is built at the start of a cycle and dropped at its end.
//! It carries the deadline and the per-domain authentication table; nothing
//! here outlives the cycle, so two contexts never interfere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobdigest_core::{AuthContext, AuthProvider};
use tokio::time::Instant;
use uuid::Uuid;

/// Authentication state of one domain within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainAuth {
    NotAttempted,
    Ready(AuthContext),
    /// Login failed or the authenticated session still hit a login wall.
    Failed,
}

pub struct CycleContext {
    pub cycle_id: Uuid,
    deadline: Instant,
    auth: Mutex<HashMap<String, Arc<tokio::sync::Mutex<DomainAuth>>>>,
}

impl CycleContext {
    pub fn new(cycle_id: Uuid, timeout: Duration) -> Self {
        Self {
            cycle_id,
            deadline: Instant::now() + timeout,
            auth: Mutex::new(HashMap::new()),
        }
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn slot(&self, domain: &str) -> Arc<tokio::sync::Mutex<DomainAuth>> {
        let mut table = self.auth.lock().unwrap_or_else(|p| p.into_inner());
        table
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(DomainAuth::NotAttempted)))
            .clone()
    }

    /// Session for `domain`, acquiring it through `provider` on first use.
    ///
    /// Callers for the same domain wait on each other, so the provider is asked
    /// at most once per domain per cycle. Returns `None` once the domain failed.
    pub async fn authenticate(
        &self,
        domain: &str,
        provider: &dyn AuthProvider,
    ) -> Option<AuthContext> {
        let slot = self.slot(domain);
        let mut state = slot.lock().await;

        match &*state {
            DomainAuth::Ready(ctx) => return Some(ctx.clone()),
            DomainAuth::Failed => return None,
            DomainAuth::NotAttempted => {}
        }

        tracing::info!(cycle_id = %self.cycle_id, domain = %domain, "Acquiring authenticated session");
        match provider.get_authenticated_context(domain).await {
            Ok(ctx) => {
                *state = DomainAuth::Ready(ctx.clone());
                Some(ctx)
            }
            Err(e) => {
                tracing::warn!(cycle_id = %self.cycle_id, domain = %domain, error = %e, "Authentication failed, domain disabled for this cycle");
                *state = DomainAuth::Failed;
                None
            }
        }
    }

    /// Stop using `domain`'s session for the rest of the cycle.
    pub async fn mark_failed(&self, domain: &str) {
        let slot = self.slot(domain);
        let mut state = slot.lock().await;
        if *state != DomainAuth::Failed {
            tracing::warn!(cycle_id = %self.cycle_id, domain = %domain, "Authenticated session rejected, domain disabled for this cycle");
        }
        *state = DomainAuth::Failed;
    }

    pub async fn auth_state(&self, domain: &str) -> DomainAuth {
        self.slot(domain).lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobdigest_core::AuthError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl AuthProvider for CountingProvider {
        async fn get_authenticated_context(&self, domain: &str) -> Result<AuthContext, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.succeed {
                Ok(AuthContext::with_cookie(domain, "s=1"))
            } else {
                Err(AuthError::failed(domain, "denied"))
            }
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_acquisition() {
        let ctx = CycleContext::new(Uuid::new_v4(), Duration::from_secs(60));
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            succeed: true,
        };

        let results = futures::future::join_all(
            (0..5).map(|_| ctx.authenticate("linkedin.com", &provider)),
        )
        .await;

        assert!(results.iter().all(|r| r.is_some()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_domain_is_never_retried_within_cycle() {
        let ctx = CycleContext::new(Uuid::new_v4(), Duration::from_secs(60));
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            succeed: false,
        };

        assert!(ctx.authenticate("linkedin.com", &provider).await.is_none());
        assert!(ctx.authenticate("linkedin.com", &provider).await.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.auth_state("linkedin.com").await, DomainAuth::Failed);
    }

    #[tokio::test]
    async fn mark_failed_overrides_ready_session() {
        let ctx = CycleContext::new(Uuid::new_v4(), Duration::from_secs(60));
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            succeed: true,
        };

        assert!(ctx.authenticate("example.com", &provider).await.is_some());
        ctx.mark_failed("example.com").await;
        assert!(ctx.authenticate("example.com", &provider).await.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_timeout_deadline_is_already_passed() {
        let ctx = CycleContext::new(Uuid::new_v4(), Duration::ZERO);
        assert!(ctx.deadline_passed());
        let ctx = CycleContext::new(Uuid::new_v4(), Duration::from_secs(60));
        assert!(!ctx.deadline_passed());
    }
}
