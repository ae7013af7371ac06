//! Bearer token lifecycle
//!
//! [`TokenManager`] owns one bearer credential. It hands out the cached token
//! while it is younger than the preventive refresh interval and authenticates
//! again otherwise. All access goes through one async mutex, so at most one
//! authentication is in flight and concurrent callers wait for its result
//! instead of issuing their own.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::error::{RemoteFailure, RemoteResult};

/// Default preventive refresh interval (3.5 hours)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(12_600);

/// Source of fresh bearer tokens
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Perform one authentication round-trip
    async fn authenticate(&self) -> RemoteResult<String>;

    /// Token scope label used in logs and metrics
    fn scope(&self) -> &str;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    obtained_at: Instant,
}

/// Snapshot of the token state for observability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub scope: String,
    pub has_token: bool,
    pub age: Option<Duration>,
    pub should_refresh: bool,
    pub refresh_interval: Duration,
}

/// Cached bearer token with preventive and forced refresh
pub struct TokenManager<A> {
    authenticator: A,
    refresh_interval: Duration,
    state: Mutex<Option<CachedToken>>,
}

impl<A: Authenticator> TokenManager<A> {
    pub fn new(authenticator: A, refresh_interval: Duration) -> Self {
        Self {
            authenticator,
            refresh_interval,
            state: Mutex::new(None),
        }
    }

    /// Scope of the underlying authenticator
    pub fn scope(&self) -> &str {
        self.authenticator.scope()
    }

    /// Return the cached token, authenticating first when it is missing or due
    pub async fn get_valid_token(&self) -> RemoteResult<String> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if cached.obtained_at.elapsed() < self.refresh_interval {
                return Ok(cached.token.clone());
            }
            tracing::debug!(scope = self.scope(), "Token due for preventive refresh");
        }

        self.refresh_locked(&mut state).await
    }

    /// Discard the cached token and authenticate again
    pub async fn force_refresh(&self) -> RemoteResult<String> {
        let mut state = self.state.lock().await;
        tracing::info!(scope = self.scope(), "Forcing token refresh");
        self.refresh_locked(&mut state).await
    }

    /// Replace a token the remote side rejected
    ///
    /// Callers holding the same rejected token queue on the lock; only the
    /// first authenticates and the rest receive the token it obtained.
    pub async fn refresh_rejected(&self, rejected: &str) -> RemoteResult<String> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if cached.token != rejected {
                tracing::debug!(scope = self.scope(), "Rejected token already replaced");
                return Ok(cached.token.clone());
            }
        }

        tracing::info!(scope = self.scope(), "Token rejected, authenticating again");
        self.refresh_locked(&mut state).await
    }

    /// Report whether a token exists and whether it is due for refresh
    pub async fn token_info(&self) -> TokenInfo {
        let state = self.state.lock().await;
        let age = state.as_ref().map(|c| c.obtained_at.elapsed());

        TokenInfo {
            scope: self.scope().to_string(),
            has_token: state.is_some(),
            age,
            should_refresh: age.map_or(true, |a| a >= self.refresh_interval),
            refresh_interval: self.refresh_interval,
        }
    }

    /// Drop the cached token
    pub async fn clear(&self) {
        *self.state.lock().await = None;
    }

    async fn refresh_locked(&self, state: &mut Option<CachedToken>) -> RemoteResult<String> {
        // Never leave a stale token behind if authentication fails
        *state = None;

        match self.authenticator.authenticate().await {
            Ok(token) if !token.trim().is_empty() => {
                let token = token.trim().to_string();
                tracing::info!(
                    scope = self.scope(),
                    token_len = token.len(),
                    "Authenticated against remote API"
                );
                crate::metrics::record_authentication(self.scope(), true);

                *state = Some(CachedToken {
                    token: token.clone(),
                    obtained_at: Instant::now(),
                });
                Ok(token)
            }
            Ok(_) => {
                crate::metrics::record_authentication(self.scope(), false);
                Err(RemoteFailure::authentication(
                    None,
                    "authentication returned an empty token",
                ))
            }
            Err(e) => {
                tracing::warn!(scope = self.scope(), error = %e, "Authentication failed");
                crate::metrics::record_authentication(self.scope(), false);
                Err(e)
            }
        }
    }
}
