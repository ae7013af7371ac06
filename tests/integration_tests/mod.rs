//! Integration tests module
//!
//! End-to-end tests of the sync loops against a wiremock clearinghouse:
//! - Batch transmission and its failure handling
//! - Field-change monitor and pull reconciliation
//! - Error handling and recovery scenarios

pub mod error_scenarios;
pub mod fixtures;
pub mod monitor_test;
pub mod transmission_test;
