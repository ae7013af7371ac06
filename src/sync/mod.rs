//! Synchronization loops
//!
//! - [`transmitter`] - batch transmission of pending guides
//! - [`field_monitor`] - resends guides changed while under observation
//! - [`pull_monitor`] - reconciles local fields against the export feed
//! - [`service`] - start/stop lifecycle shared by the loops
//! - [`engine`] - owns the three loops

pub mod engine;
pub mod field_monitor;
pub mod pull_monitor;
pub mod service;
pub mod transmitter;

pub use engine::{EngineStatus, SyncEngine};
pub use field_monitor::{FieldMonitor, GuideAction, ResendTrigger};
pub use pull_monitor::{reconcile, ConflictGuard, PullMonitor};
pub use service::{CycleOutcome, CycleReport, SyncCycle, SyncService};
pub use transmitter::Transmitter;
