//! HTTP client for the clearinghouse API
//!
//! Executes authenticate, send and export calls. Every call that carries a
//! bearer token gets exactly one forced refresh-and-retry when the response
//! signals an expired token; every other retry is left to the calling loop.
//! The client never touches the guide store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{json, Value};

use super::classifier::{classify, find_embedded_error, is_auth_expired};
use super::error::{FailureKind, RemoteFailure, RemoteResult};
use super::extractor::{total_pages, unwrap_records};
use super::payload::PayloadBuilder;
use super::token::{Authenticator, TokenInfo, TokenManager};
use crate::config::{RemoteConfig, TokenConfig};
use crate::error::Result;
use crate::utils::truncate_chars;

/// Longest response excerpt kept in a failure message
const MAX_BODY_EXCERPT: usize = 500;

// ============================================================================
// Credentials & Authentication
// ============================================================================

/// Login credentials for one token scope
#[derive(Clone, Serialize)]
pub struct Credentials {
    #[serde(rename = "userName")]
    pub username: String,
    pub password: String,
    pub origin: String,
    #[serde(skip)]
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// POST the credentials and return the plain-text token
async fn request_token(http: &Client, auth_url: &str, credentials: &Credentials) -> RemoteResult<String> {
    let response = http
        .post(auth_url)
        .bearer_auth(&credentials.api_key)
        .json(credentials)
        .send()
        .await?;

    let status = response.status().as_u16();
    let body = response.text().await?;

    if (200..300).contains(&status) {
        let token = body.trim();
        if token.is_empty() {
            return Err(RemoteFailure::authentication(
                Some(status),
                "authentication returned an empty token",
            ));
        }
        return Ok(token.to_string());
    }

    let message = format!(
        "authentication failed: HTTP {status} - {}",
        truncate_chars(body.trim(), MAX_BODY_EXCERPT)
    );

    if status >= 500 {
        Err(RemoteFailure::new(FailureKind::Transient, Some(status), message))
    } else {
        Err(RemoteFailure::authentication(Some(status), message))
    }
}

/// [`Authenticator`] backed by the login endpoint
pub struct CredentialAuthenticator {
    http: Client,
    auth_url: String,
    credentials: Credentials,
    scope: &'static str,
}

impl CredentialAuthenticator {
    pub fn new(
        http: Client,
        auth_url: impl Into<String>,
        credentials: Credentials,
        scope: &'static str,
    ) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
            credentials,
            scope,
        }
    }
}

#[async_trait]
impl Authenticator for CredentialAuthenticator {
    async fn authenticate(&self) -> RemoteResult<String> {
        request_token(&self.http, &self.auth_url, &self.credentials).await
    }

    fn scope(&self) -> &str {
        self.scope
    }
}

// ============================================================================
// Transport Types
// ============================================================================

/// Successful send response
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub status: u16,
    pub body: Value,
}

/// Selection sent to the export endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportFilter {
    pub guide_numbers: Vec<String>,
    pub since: Option<NaiveDate>,
    pub page_size: usize,
}

/// One page of export records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportPage {
    pub records: Vec<Value>,
    pub page: u32,
    /// Page count advertised by a paged envelope, if any
    pub total_pages: Option<u32>,
}

/// RPC boundary used by the sync loops
#[async_trait]
pub trait GuideTransport: Send + Sync {
    /// Send one guide payload
    async fn send_one(&self, payload: &Value) -> RemoteResult<SendReceipt>;

    /// Send several single-guide payloads as one batch
    async fn send_batch(&self, payloads: &[Value]) -> RemoteResult<SendReceipt>;

    /// Fetch one page of the clearinghouse export
    async fn pull_export(&self, filter: &ExportFilter, page: u32) -> RemoteResult<ExportPage>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn GuideTransport>;

// ============================================================================
// Remote Client
// ============================================================================

/// Clearinghouse client with separate transmission and export token scopes
pub struct RemoteClient {
    http: Client,
    auth_url: String,
    send_url: String,
    export_url: String,
    export_api_key: String,
    transmission_tokens: TokenManager<CredentialAuthenticator>,
    export_tokens: TokenManager<CredentialAuthenticator>,
}

impl RemoteClient {
    /// Create a client from configuration
    pub fn new(remote: &RemoteConfig, token: &TokenConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(remote.http_timeout_secs))
            .gzip(true)
            .build()?;

        let refresh = Duration::from_secs(token.refresh_interval_secs);

        let transmission = Credentials {
            username: remote.username.clone(),
            password: remote.password.clone(),
            origin: remote.origin.clone(),
            api_key: remote.api_key.clone(),
        };
        let export = Credentials {
            username: remote.export_username.clone(),
            password: remote.export_password.clone(),
            origin: remote.origin.clone(),
            api_key: remote.effective_export_api_key().to_string(),
        };

        Ok(Self {
            transmission_tokens: TokenManager::new(
                CredentialAuthenticator::new(http.clone(), &remote.auth_url, transmission, "transmission"),
                refresh,
            ),
            export_tokens: TokenManager::new(
                CredentialAuthenticator::new(http.clone(), &remote.auth_url, export, "export"),
                refresh,
            ),
            export_api_key: remote.effective_export_api_key().to_string(),
            auth_url: remote.auth_url.clone(),
            send_url: remote.send_url.clone(),
            export_url: remote.export_url.clone(),
            http,
        })
    }

    /// One authentication round-trip with explicit credentials
    pub async fn authenticate(&self, credentials: &Credentials) -> RemoteResult<String> {
        request_token(&self.http, &self.auth_url, credentials).await
    }

    /// Token manager for the transmission scope
    pub fn transmission_tokens(&self) -> &TokenManager<CredentialAuthenticator> {
        &self.transmission_tokens
    }

    /// Token manager for the export scope
    pub fn export_tokens(&self) -> &TokenManager<CredentialAuthenticator> {
        &self.export_tokens
    }

    /// Token state of both scopes
    pub async fn token_info(&self) -> Vec<TokenInfo> {
        vec![
            self.transmission_tokens.token_info().await,
            self.export_tokens.token_info().await,
        ]
    }

    /// Run `call` with a valid token, refreshing once on an expired-token signal
    async fn with_token<T, F, Fut>(
        &self,
        tokens: &TokenManager<CredentialAuthenticator>,
        operation: &'static str,
        call: F,
    ) -> RemoteResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let token = tokens.get_valid_token().await.inspect_err(|e| {
            crate::metrics::record_remote_failure(operation, e.kind.as_str());
        })?;

        let result = match call(token.clone()).await {
            Err(e) if e.kind == FailureKind::Authentication => {
                tracing::warn!(operation, error = %e, "Token rejected, refreshing once");
                match tokens.refresh_rejected(&token).await {
                    Ok(token) => call(token).await,
                    Err(refresh_err) => Err(refresh_err),
                }
            }
            other => other,
        };

        if let Err(e) = &result {
            crate::metrics::record_remote_failure(operation, e.kind.as_str());
        }
        result
    }

    async fn post_guides(&self, payload: &Value, token: String) -> RemoteResult<SendReceipt> {
        // The send endpoint expects the raw token, without a scheme
        let response = self
            .http
            .post(&self.send_url)
            .header(reqwest::header::AUTHORIZATION, token)
            .json(payload)
            .send()
            .await?;

        interpret_send_response(response).await
    }

    async fn post_export(&self, body: &Value, page: u32, token: String) -> RemoteResult<ExportPage> {
        let response = self
            .http
            .post(&self.export_url)
            .bearer_auth(token)
            .header("x-api-key", &self.export_api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(http_failure(status, &text));
        }

        if text.trim().is_empty() {
            return Ok(ExportPage {
                records: Vec::new(),
                page,
                total_pages: None,
            });
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            RemoteFailure::new(
                FailureKind::Permanent,
                Some(status),
                format!("malformed export response: {e}"),
            )
        })?;

        if let Some(message) = find_embedded_error(&parsed) {
            return Err(embedded_failure(status, message));
        }

        Ok(ExportPage {
            records: unwrap_records(&parsed),
            page,
            total_pages: total_pages(&parsed),
        })
    }
}

#[async_trait]
impl GuideTransport for RemoteClient {
    async fn send_one(&self, payload: &Value) -> RemoteResult<SendReceipt> {
        self.with_token(&self.transmission_tokens, "send_one", |token| {
            self.post_guides(payload, token)
        })
        .await
    }

    async fn send_batch(&self, payloads: &[Value]) -> RemoteResult<SendReceipt> {
        let batch = PayloadBuilder::merge_batch(payloads);
        self.with_token(&self.transmission_tokens, "send_batch", |token| {
            self.post_guides(&batch, token)
        })
        .await
    }

    async fn pull_export(&self, filter: &ExportFilter, page: u32) -> RemoteResult<ExportPage> {
        let mut body = json!({
            "numeroGuia": filter.guide_numbers,
            "pagina": page,
            "tamanhoPagina": filter.page_size,
        });
        if let Some(since) = filter.since {
            body["dataInicio"] = json!(since.format("%Y-%m-%d").to_string());
        }

        self.with_token(&self.export_tokens, "pull_export", |token| {
            self.post_export(&body, page, token)
        })
        .await
    }
}

// ============================================================================
// Response Interpretation
// ============================================================================

async fn interpret_send_response(response: Response) -> RemoteResult<SendReceipt> {
    let status = response.status().as_u16();
    let text = response.text().await?;

    if !(200..300).contains(&status) {
        return Err(http_failure(status, &text));
    }

    // Non-JSON success bodies are kept verbatim
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.trim().to_string()))
    };

    if let Some(message) = find_embedded_error(&body) {
        return Err(embedded_failure(status, message));
    }

    Ok(SendReceipt { status, body })
}

/// Classify a non-2xx response
fn http_failure(status: u16, body: &str) -> RemoteFailure {
    let excerpt = truncate_chars(body.trim(), MAX_BODY_EXCERPT);
    let message = if excerpt.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status} - {excerpt}")
    };

    if is_auth_expired(Some(status), body) && status < 500 {
        return RemoteFailure::authentication(Some(status), message);
    }

    RemoteFailure::new(classify(Some(status), body).into(), Some(status), message)
}

/// Error reported inside a 2xx body
fn embedded_failure(status: u16, message: String) -> RemoteFailure {
    if is_auth_expired(None, &message) {
        return RemoteFailure::authentication(Some(status), message);
    }
    RemoteFailure::embedded(status, truncate_chars(&message, MAX_BODY_EXCERPT))
}
