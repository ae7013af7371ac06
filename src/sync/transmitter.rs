//! Batch transmission scheduler
//!
//! Each cycle collects `Awaiting` guides (plus, optionally, `Error` guides
//! whose last message looks like an infrastructure fault), partitions them
//! into batches in discovery order and, per batch, marks every member
//! `Processing` before calling the remote side. The batch outcome is then
//! applied to every member alike.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::service::{CycleOutcome, CycleReport, SyncCycle};
use crate::config::TransmissionConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Guide, TransmissionStatus};
use crate::remote::{classify, PayloadBuilder, SharedTransport};
use crate::storage::SharedGuideRepository;
use crate::utils::{error_message, partition_batches};

/// Sends pending guides in batches
pub struct Transmitter {
    repo: SharedGuideRepository,
    transport: SharedTransport,
    payloads: Arc<PayloadBuilder>,
    config: TransmissionConfig,
}

impl Transmitter {
    pub fn new(
        repo: SharedGuideRepository,
        transport: SharedTransport,
        payloads: Arc<PayloadBuilder>,
        config: TransmissionConfig,
    ) -> Self {
        Self {
            repo,
            transport,
            payloads,
            config,
        }
    }

    /// Return guides stuck in `Processing` to `Awaiting`
    ///
    /// A crash between marking and reconciling leaves guides in flight; this
    /// hands them back to the next cycle.
    pub fn recover_stale(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.config.stale_processing();
        let mut recovered = 0;

        for mut guide in self.repo.find_stale_processing(cutoff)? {
            guide.transmission_status = TransmissionStatus::Awaiting;
            match self.repo.save(&guide) {
                Ok(_) => recovered += 1,
                Err(Error::Conflict { .. }) => {
                    tracing::debug!(guide = %guide.guide_number, "Stale guide moved concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered guides stuck in Processing");
        }
        Ok(recovered)
    }

    /// Guides eligible for this cycle, in discovery order
    fn collect(&self) -> Result<Vec<Guide>> {
        let mut guides = self
            .repo
            .find_by_transmission_status(TransmissionStatus::Awaiting)?;

        if self.config.include_retryable_errors {
            let healing = self
                .repo
                .find_by_transmission_status(TransmissionStatus::Error)?
                .into_iter()
                .filter(|g| !g.is_watching())
                .filter(|g| {
                    g.error_message
                        .as_deref()
                        .is_some_and(|m| classify(None, m).is_retryable())
                });
            guides.extend(healing);
            guides.sort_by_key(|g| g.id);
        }

        Ok(guides)
    }

    /// Build payloads; guides that cannot be built go to `Error` on their own
    fn prepare(&self, guides: Vec<Guide>, report: &mut CycleReport) -> Vec<(Guide, Value)> {
        let mut ready = Vec::with_capacity(guides.len());

        for mut guide in guides {
            match self.payloads.build_guide(&guide) {
                Ok(payload) => ready.push((guide, payload)),
                Err(e) => {
                    tracing::error!(guide = %guide.guide_number, error = %e, "Payload build failed");
                    guide.mark_error(error_message(&e.to_string()));
                    report.failed += 1;
                    metrics::record_transmissions("payload_error", 1);
                    if let Err(save_err) = self.repo.save(&guide) {
                        tracing::warn!(
                            guide = %guide.guide_number,
                            error = %save_err,
                            "Could not record payload error"
                        );
                    }
                }
            }
        }

        ready
    }

    /// Mark members `Processing`, send, then reconcile every member
    async fn dispatch_batch(&self, index: usize, batch: Vec<(Guide, Value)>, report: &mut CycleReport) {
        let now = Utc::now();
        let mut members = Vec::with_capacity(batch.len());

        for (mut guide, payload) in batch {
            guide.transmission_status = TransmissionStatus::Processing;
            guide.attempts += 1;
            guide.processed_at = Some(now);

            match self.repo.save(&guide) {
                Ok(saved) => members.push((saved, payload)),
                Err(Error::Conflict { .. }) => {
                    tracing::warn!(guide = %guide.guide_number, "Guide moved concurrently, left out of batch");
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!(guide = %guide.guide_number, error = %e, "Could not mark guide as processing");
                }
            }
        }

        if members.is_empty() {
            return;
        }

        let payloads: Vec<Value> = members.iter().map(|(_, p)| p.clone()).collect();
        let size = members.len();
        tracing::debug!(batch = index, size, "Sending batch");

        let result = self.transport.send_batch(&payloads).await;

        let outcome = match &result {
            Ok(receipt) => {
                tracing::info!(batch = index, size, status = receipt.status, "Batch transmitted");
                report.succeeded += size;
                "transmitted"
            }
            Err(f) if f.is_retryable() => {
                tracing::warn!(batch = index, size, error = %f, "Batch failed, will retry");
                report.retried += size;
                "retry"
            }
            Err(f) => {
                tracing::error!(batch = index, size, kind = f.kind.as_str(), error = %f, "Batch rejected");
                report.failed += size;
                "error"
            }
        };
        metrics::record_transmissions(outcome, size);

        let reconciled_at = Utc::now();
        for (mut guide, _) in members {
            match &result {
                Ok(_) => {
                    guide.mark_transmitted();
                    // Baseline for the field monitor: only later edits count as changes
                    guide.last_checked_at = Some(reconciled_at);
                }
                Err(f) if f.is_retryable() => {
                    guide.transmission_status = TransmissionStatus::Awaiting;
                    guide.error_message = Some(error_message(&f.message));
                }
                Err(f) => guide.mark_error(error_message(&f.message)),
            }

            if let Err(e) = self.repo.save(&guide) {
                tracing::error!(guide = %guide.guide_number, error = %e, "Could not record batch outcome");
            }
        }
    }

    /// One full collect-dispatch-reconcile pass
    pub async fn run_once(&self) -> Result<CycleReport> {
        let _timer = metrics::start_cycle_timer(self.name());
        let mut report = CycleReport::default();

        let guides = self.collect()?;
        report.examined = guides.len();
        if guides.is_empty() {
            tracing::debug!("No guides awaiting transmission");
            return Ok(report);
        }

        let ready = self.prepare(guides, &mut report);
        let batches = partition_batches(&ready, self.config.batch_size);
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
            self.dispatch_batch(index + 1, batch, &mut report).await;
        }

        tracing::info!(
            batches = total,
            transmitted = report.succeeded,
            retried = report.retried,
            failed = report.failed,
            "Transmission cycle finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl SyncCycle for Transmitter {
    fn name(&self) -> &'static str {
        "transmission"
    }

    async fn on_start(&self) -> Result<()> {
        self.recover_stale().map(|_| ())
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_once().await.map(CycleOutcome::Completed)
    }
}
