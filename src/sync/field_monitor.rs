//! Field-change monitor
//!
//! Walks every guide under observation and decides, per guide, between a
//! full resend of its current state, finalization, or nothing at all.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::service::{CycleOutcome, CycleReport, SyncCycle};
use crate::config::FieldMonitorConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Guide, TransmissionStatus, WatchStatus};
use crate::remote::{PayloadBuilder, SharedTransport};
use crate::storage::SharedGuideRepository;
use crate::utils::error_message;

/// Why a guide is being resent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendTrigger {
    /// Authorization password appeared on an approved guide
    PasswordAppeared,
    /// Any other recent local mutation
    FieldChanged,
}

impl ResendTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::PasswordAppeared => "password",
            Self::FieldChanged => "change",
        }
    }
}

/// Per-guide decision for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideAction {
    Resend(ResendTrigger),
    /// Finalize without any network call
    Finalize(&'static str),
    Skip,
}

/// What happened to one guide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Sent,
    Retry,
    Failed,
    Finalized,
    Untouched,
}

/// Resends changed guides and ends observation of settled ones
pub struct FieldMonitor {
    repo: SharedGuideRepository,
    transport: SharedTransport,
    payloads: Arc<PayloadBuilder>,
    config: FieldMonitorConfig,
}

impl FieldMonitor {
    pub fn new(
        repo: SharedGuideRepository,
        transport: SharedTransport,
        payloads: Arc<PayloadBuilder>,
        config: FieldMonitorConfig,
    ) -> Self {
        Self {
            repo,
            transport,
            payloads,
            config,
        }
    }

    /// Changed since the last reconciliation and within the freshness window
    ///
    /// A guide never reconciled has no baseline to compare against and is
    /// not a candidate.
    pub fn is_change_candidate(&self, guide: &Guide, now: DateTime<Utc>) -> bool {
        let changed = guide
            .last_checked_at
            .is_some_and(|checked| guide.updated_at > checked);
        changed && now - guide.updated_at <= self.config.freshness_window()
    }

    /// Decide what this cycle does with `guide`
    ///
    /// A password appearing on a fresh approved guide wins over terminal
    /// finalization, so the authorized state is resent before observation ends.
    pub fn decide(&self, guide: &Guide, now: DateTime<Utc>) -> GuideAction {
        let candidate = self.is_change_candidate(guide, now);

        if candidate && guide.has_approved_password() {
            GuideAction::Resend(ResendTrigger::PasswordAppeared)
        } else if guide.situation.is_terminal() {
            GuideAction::Finalize("terminal")
        } else if guide.attempts >= self.config.max_attempts {
            GuideAction::Finalize("attempts")
        } else if candidate {
            GuideAction::Resend(ResendTrigger::FieldChanged)
        } else {
            GuideAction::Skip
        }
    }

    fn finalize(&self, mut guide: Guide, reason: &'static str) -> Result<Handled> {
        guide.watch_status = WatchStatus::Finalized;
        self.repo.save(&guide)?;

        tracing::info!(guide = %guide.guide_number, reason, "Observation finalized");
        metrics::record_finalized(reason);
        Ok(Handled::Finalized)
    }

    async fn resend(&self, mut guide: Guide, trigger: ResendTrigger, now: DateTime<Utc>) -> Result<Handled> {
        let payload = match self.payloads.build_guide(&guide) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(guide = %guide.guide_number, error = %e, "Payload build failed");
                guide.mark_error(error_message(&e.to_string()));
                guide.last_checked_at = Some(now);
                self.repo.save(&guide)?;
                metrics::record_resend(trigger.as_str(), "payload_error");
                return Ok(Handled::Failed);
            }
        };

        guide.attempts += 1;
        tracing::debug!(
            guide = %guide.guide_number,
            trigger = trigger.as_str(),
            attempt = guide.attempts,
            "Resending guide"
        );

        let handled = match self.transport.send_one(&payload).await {
            Ok(_) => {
                guide.mark_transmitted();
                guide.processed_at = Some(now);
                guide.last_checked_at = Some(now);
                if trigger == ResendTrigger::PasswordAppeared {
                    guide.watch_status = WatchStatus::Finalized;
                    metrics::record_finalized("password");
                }
                tracing::info!(guide = %guide.guide_number, trigger = trigger.as_str(), "Guide resent");
                Handled::Sent
            }
            Err(f) if f.is_retryable() => {
                // Transmitted guides never carry a message
                if guide.transmission_status == TransmissionStatus::Error {
                    guide.error_message = Some(error_message(&f.message));
                }
                tracing::warn!(guide = %guide.guide_number, error = %f, "Resend failed, will retry");
                Handled::Retry
            }
            Err(f) => {
                guide.mark_error(error_message(&f.message));
                guide.last_checked_at = Some(now);
                tracing::error!(
                    guide = %guide.guide_number,
                    kind = f.kind.as_str(),
                    error = %f,
                    "Resend rejected"
                );
                Handled::Failed
            }
        };

        let outcome = match handled {
            Handled::Sent => "success",
            Handled::Retry => "retry",
            _ => "error",
        };
        metrics::record_resend(trigger.as_str(), outcome);

        self.repo.save(&guide)?;
        Ok(handled)
    }

    async fn handle(&self, guide: Guide, now: DateTime<Utc>) -> Result<Handled> {
        match self.decide(&guide, now) {
            GuideAction::Resend(trigger) => self.resend(guide, trigger, now).await,
            GuideAction::Finalize(reason) => self.finalize(guide, reason),
            GuideAction::Skip => Ok(Handled::Untouched),
        }
    }

    /// One pass over every watched guide
    pub async fn run_once(&self) -> Result<CycleReport> {
        let _timer = metrics::start_cycle_timer(self.name());
        let mut report = CycleReport::default();
        let now = Utc::now();

        let guides = self.repo.find_watching()?;
        report.examined = guides.len();

        for guide in guides {
            let number = guide.guide_number.clone();
            match self.handle(guide, now).await {
                Ok(Handled::Sent) => report.succeeded += 1,
                Ok(Handled::Retry) => report.retried += 1,
                Ok(Handled::Failed) => report.failed += 1,
                Ok(Handled::Finalized) => report.finalized += 1,
                Ok(Handled::Untouched) => {}
                Err(Error::Conflict { .. }) => {
                    tracing::warn!(guide = %number, "Guide moved concurrently, skipped this cycle");
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!(guide = %number, error = %e, "Could not process watched guide");
                }
            }
        }

        Ok(report)
    }

    /// End observation of one guide regardless of its state
    pub fn force_finalize(&self, guide_number: &str) -> Result<Guide> {
        let mut guide = self
            .repo
            .get_by_number(guide_number)?
            .ok_or_else(|| Error::not_found(guide_number))?;

        guide.watch_status = WatchStatus::Finalized;
        let saved = self.repo.save(&guide)?;

        tracing::info!(guide = %guide_number, "Observation finalized manually");
        metrics::record_finalized("forced");
        Ok(saved)
    }
}

#[async_trait]
impl SyncCycle for FieldMonitor {
    fn name(&self) -> &'static str {
        "field_monitor"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_once().await.map(CycleOutcome::Completed)
    }
}
