//! guia-sync - Guide synchronization engine
//!
//! Keeps locally stored hospital admission guides in step with a
//! clearinghouse API: pending guides are transmitted in batches, guides
//! under observation are resent when their fields change, and the remote
//! export feed is pulled back to reconcile authorization data.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Guides, status codes and clinical details
//! - [`storage`] - Guide store (SQLite, in-memory mock)
//! - [`remote`] - Clearinghouse client, token lifecycle, failure classification
//! - [`sync`] - Transmission, field-change and pull loops
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use guia_sync::config::Config;
//! use guia_sync::sync::SyncEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = SyncEngine::connect(&config)?;
//!     engine.start_all();
//!     tokio::signal::ctrl_c().await?;
//!     engine.stop_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, SyncErrorTrait};
    pub use crate::models::{Guide, NewGuide, Situation, TransmissionStatus, WatchStatus};
    pub use crate::remote::{FailureKind, GuideTransport, RemoteClient, RemoteFailure};
    pub use crate::storage::{GuideRepository, SharedGuideRepository};
    pub use crate::sync::{CycleOutcome, CycleReport, SyncEngine};
}

// Direct re-exports for convenience
pub use models::{Guide, NewGuide, Situation, TransmissionStatus, WatchStatus};
