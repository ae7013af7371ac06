//! Unified error handling for the guia-sync crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors into a single `Error` enum, while keeping the
//! remote failure taxonomy available to callers that need to match on it.
//!
//! # Architecture
//!
//! - [`SyncErrorTrait`] - Common interface implemented by the error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use guia_sync::error::{Error, SyncErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "will retry next cycle");
//!     } else {
//!         tracing::error!(error = %err, category = ?err.category(), "fatal");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::remote::error::{FailureKind, RemoteFailure};
pub use crate::remote::payload::PayloadError;

/// Common trait for all guia-sync error types
pub trait SyncErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the next cycle may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-level errors (HTTP client, timeout)
    Network,
    /// Failures reported by the clearinghouse
    Remote,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Guide payload could not be assembled
    Payload,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Remote => "remote",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Payload => "payload",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the guia-sync crate
#[derive(Error, Debug)]
pub enum Error {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Classified failure from the clearinghouse API
    #[error("Remote error ({kind}): {0}", kind = .0.kind.as_str())]
    Remote(#[from] RemoteFailure),

    /// Payload assembly errors
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Row changed since it was read
    #[error("Guide {guide_number} was modified concurrently")]
    Conflict { guide_number: String },

    /// No guide with this number
    #[error("Guide {guide_number} not found")]
    NotFound { guide_number: String },

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SyncErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Remote(e) => e.is_retryable(),
            Self::Payload(_) => false,
            Self::Conflict { .. } => true,
            Self::NotFound { .. } => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(_) => ErrorCategory::Network,
            Self::Remote(e) if e.kind == FailureKind::Transient && e.status.is_none() => {
                ErrorCategory::Network
            }
            Self::Remote(_) => ErrorCategory::Remote,
            Self::Database(_) | Self::Io(_) | Self::Conflict { .. } | Self::NotFound { .. } => {
                ErrorCategory::Storage
            }
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Payload(_) => ErrorCategory::Payload,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn conflict(guide_number: impl Into<String>) -> Self {
        Self::Conflict {
            guide_number: guide_number.into(),
        }
    }

    pub fn not_found(guide_number: impl Into<String>) -> Self {
        Self::NotFound {
            guide_number: guide_number.into(),
        }
    }

    /// Lock poisoning on a shared store
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::other(format!("{what} lock poisoned"))
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
