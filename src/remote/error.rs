//! Failure taxonomy for calls against the clearinghouse API
//!
//! Every remote operation returns a [`RemoteResult`]. Callers match on
//! [`FailureKind`] instead of inspecting message text.

use thiserror::Error;

use super::classifier::Retryability;

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteFailure>;

/// Classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Credential or token problem that survived the forced refresh
    Authentication,
    /// Network, timeout, 5xx or "unavailable" style failure
    Transient,
    /// Validation or business-rule rejection
    Permanent,
}

impl FailureKind {
    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl From<Retryability> for FailureKind {
    fn from(value: Retryability) -> Self {
        match value {
            Retryability::Retryable => Self::Transient,
            Retryability::NonRetryable => Self::Permanent,
        }
    }
}

/// A failed remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
    /// Set when the failure was reported inside a 2xx body
    pub embedded: bool,
}

impl RemoteFailure {
    /// Failure with an explicit kind
    pub fn new(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            embedded: false,
        }
    }

    /// Network-level fault (timeout, refused connection, reset)
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, None, message)
    }

    /// Permanent rejection without an HTTP status
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, None, message)
    }

    /// Authentication failure
    pub fn authentication(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Authentication, status, message)
    }

    /// Business error found inside a successful response body
    pub fn embedded(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            status: Some(status),
            message: message.into(),
            embedded: true,
        }
    }

    /// Only transient failures are retried, and only by the next cycle
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl From<reqwest::Error> for RemoteFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transient(format!("request timeout: {err}"));
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return Self::transient(format!("connection error: {err}"));
        }
        if err.is_decode() {
            return Self::new(
                FailureKind::Permanent,
                err.status().map(|s| s.as_u16()),
                format!("malformed response: {err}"),
            );
        }
        Self::transient(format!("network error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(RemoteFailure::transient("timeout").is_retryable());
        assert!(!RemoteFailure::permanent("invalid").is_retryable());
        assert!(!RemoteFailure::authentication(Some(401), "denied").is_retryable());
    }

    #[test]
    fn test_embedded_failure_is_permanent() {
        let failure = RemoteFailure::embedded(200, "guia não encontrada");
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert_eq!(failure.status, Some(200));
        assert!(failure.embedded);
    }

    #[test]
    fn test_kind_from_retryability() {
        assert_eq!(FailureKind::from(Retryability::Retryable), FailureKind::Transient);
        assert_eq!(
            FailureKind::from(Retryability::NonRetryable),
            FailureKind::Permanent
        );
    }

    #[test]
    fn test_display_is_message() {
        let failure = RemoteFailure::new(FailureKind::Transient, Some(503), "HTTP 503 - busy");
        assert_eq!(failure.to_string(), "HTTP 503 - busy");
    }
}
