//! Pull reconciliation monitor
//!
//! Asks the export endpoint about recently transmitted guides and copies any
//! remote value that differs from the local one. Reconciliation is advisory:
//! failures are logged and counted, never written onto a guide, and
//! `tp_status` is never touched.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::service::{CycleOutcome, CycleReport, SyncCycle};
use crate::config::PullMonitorConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::Guide;
use crate::remote::{CanonicalField, ExportFilter, RemoteGuideRecord, RemoteResult, SharedTransport};
use crate::storage::SharedGuideRepository;
use crate::utils::partition_batches;

// ============================================================================
// Conflict Guard
// ============================================================================

#[derive(Debug, Default)]
struct GuardState {
    last_run: Option<Instant>,
    last_run_at: Option<DateTime<Utc>>,
    in_flight: bool,
}

/// Keeps pull cycles from overlapping or running too close together
#[derive(Debug)]
pub struct ConflictGuard {
    state: Mutex<GuardState>,
    min_spacing: Duration,
}

/// Held for the duration of one admitted cycle
pub struct PullPermit<'a> {
    guard: &'a ConflictGuard,
}

impl Drop for PullPermit<'_> {
    fn drop(&mut self) {
        self.guard.state().in_flight = false;
    }
}

impl ConflictGuard {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            state: Mutex::new(GuardState::default()),
            min_spacing,
        }
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a cycle and stamp the run time, or refuse it
    pub fn try_begin(&self) -> Option<PullPermit<'_>> {
        let mut state = self.state();
        let now = Instant::now();

        let too_soon = state
            .last_run
            .is_some_and(|last| now.duration_since(last) < self.min_spacing);
        if state.in_flight || too_soon {
            return None;
        }

        state.last_run = Some(now);
        state.last_run_at = Some(Utc::now());
        state.in_flight = true;
        Some(PullPermit { guard: self })
    }

    /// Wall-clock start of the last admitted cycle
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.state().last_run_at
    }
}

// ============================================================================
// Field Reconciliation
// ============================================================================

/// Overwrite local fields whose remote value differs; returns what changed
///
/// Absent remote values never clear local ones.
pub fn reconcile(guide: &mut Guide, record: &RemoteGuideRecord) -> Vec<CanonicalField> {
    let mut changed = Vec::new();

    macro_rules! apply {
        ($field:ident, $canonical:expr) => {
            if record.$field.is_some() && record.$field != guide.$field {
                guide.$field = record.$field.clone();
                changed.push($canonical);
            }
        };
    }

    if let Some(situation) = record.situation {
        if situation != guide.situation {
            guide.situation = situation;
            changed.push(CanonicalField::Situation);
        }
    }

    apply!(authorization_password, CanonicalField::AuthorizationPassword);
    apply!(authorized_days, CanonicalField::AuthorizedDays);
    apply!(authorized_accommodation, CanonicalField::AuthorizedAccommodation);
    apply!(authorized_cnes, CanonicalField::AuthorizedCnes);
    apply!(authorization_date, CanonicalField::AuthorizationDate);
    apply!(notes, CanonicalField::Notes);
    apply!(payer_justification, CanonicalField::PayerJustification);
    apply!(discharge_date, CanonicalField::DischargeDate);
    apply!(discharge_type, CanonicalField::DischargeType);
    apply!(closure_reason, CanonicalField::ClosureReason);

    changed
}

// ============================================================================
// Pull Monitor
// ============================================================================

/// Reconciles recently transmitted guides against the export feed
pub struct PullMonitor {
    repo: SharedGuideRepository,
    transport: SharedTransport,
    config: PullMonitorConfig,
    guard: ConflictGuard,
}

impl PullMonitor {
    pub fn new(repo: SharedGuideRepository, transport: SharedTransport, config: PullMonitorConfig) -> Self {
        Self {
            guard: ConflictGuard::new(config.min_spacing()),
            repo,
            transport,
            config,
        }
    }

    pub fn guard(&self) -> &ConflictGuard {
        &self.guard
    }

    /// Fetch every page of the export for one group of guides
    async fn fetch_records(&self, filter: &ExportFilter) -> RemoteResult<Vec<serde_json::Value>> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let result = self.transport.pull_export(filter, page).await?;
            let fetched = result.records.len();
            records.extend(result.records);

            let more = result.total_pages.is_some_and(|total| page < total);
            if !more || fetched == 0 {
                break;
            }
            if page >= self.config.max_pages {
                tracing::warn!(max_pages = self.config.max_pages, "Export page cap reached");
                break;
            }

            page += 1;
            tokio::time::sleep(self.config.page_pause()).await;
        }

        Ok(records)
    }

    /// Apply fetched records onto the local guides of one group
    fn apply(&self, guides: &[Guide], records: &[serde_json::Value], report: &mut CycleReport) {
        let remote: HashMap<String, RemoteGuideRecord> = records
            .iter()
            .filter_map(RemoteGuideRecord::from_value)
            .map(|r| (r.guide_number.clone(), r))
            .collect();

        for guide in guides {
            let Some(record) = remote.get(&guide.guide_number) else {
                tracing::debug!(guide = %guide.guide_number, "No export record for guide");
                continue;
            };

            let mut updated = guide.clone();
            let changed = reconcile(&mut updated, record);
            if changed.is_empty() {
                continue;
            }

            // Pull writes are content changes the field monitor must see
            updated.updated_at = Utc::now();

            match self.repo.save(&updated) {
                Ok(_) => {
                    let columns: Vec<&str> = changed.iter().map(|f| f.column()).collect();
                    tracing::info!(
                        guide = %guide.guide_number,
                        fields = ?columns,
                        "Reconciled fields from export"
                    );
                    metrics::record_pull_fields(&columns);
                    report.updated += 1;
                }
                Err(Error::Conflict { .. }) => {
                    tracing::warn!(guide = %guide.guide_number, "Guide moved concurrently, reconciliation skipped");
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!(guide = %guide.guide_number, error = %e, "Could not save reconciled guide");
                }
            }
        }
    }

    /// One reconciliation pass, unless the conflict guard refuses it
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let Some(_permit) = self.guard.try_begin() else {
            tracing::warn!(
                min_spacing_secs = self.config.min_spacing_secs,
                "Pull cycle too close to the previous one, skipping"
            );
            metrics::record_pull_skipped();
            return Ok(CycleOutcome::Skipped {
                retry_after: self.config.conflict_retry(),
            });
        };

        let _timer = metrics::start_cycle_timer(self.name());
        let mut report = CycleReport::default();

        let since = Utc::now() - self.config.window();
        let guides = self.repo.find_transmitted_since(since)?;
        report.examined = guides.len();
        if guides.is_empty() {
            tracing::debug!("No recently transmitted guides to reconcile");
            return Ok(CycleOutcome::Completed(report));
        }

        let groups = partition_batches(&guides, self.config.max_page_size);
        let total = groups.len();

        for (index, group) in groups.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.page_pause()).await;
            }

            let filter = ExportFilter {
                guide_numbers: group.iter().map(|g| g.guide_number.clone()).collect(),
                since: Some(since.date_naive()),
                page_size: group.len(),
            };

            match self.fetch_records(&filter).await {
                Ok(records) => {
                    tracing::debug!(group = index + 1, records = records.len(), "Export group fetched");
                    self.apply(group, &records, &mut report);
                }
                Err(f) => {
                    tracing::warn!(
                        group = index + 1,
                        groups = total,
                        kind = f.kind.as_str(),
                        error = %f,
                        "Export group failed, continuing"
                    );
                    metrics::record_pull_page_failure();
                }
            }
        }

        Ok(CycleOutcome::Completed(report))
    }
}

#[async_trait]
impl SyncCycle for PullMonitor {
    fn name(&self) -> &'static str {
        "pull_monitor"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_once().await
    }
}
