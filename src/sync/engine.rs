//! Sync engine
//!
//! Constructed once at startup; owns the three loops and hands out the
//! handles the binary needs to drive or inspect them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::field_monitor::FieldMonitor;
use super::pull_monitor::PullMonitor;
use super::service::SyncService;
use super::transmitter::Transmitter;
use crate::config::Config;
use crate::error::Result;
use crate::remote::{PayloadBuilder, RemoteClient, SharedTransport, TokenInfo};
use crate::storage::{create_sqlite_repository, SharedGuideRepository, StatusCounts};

/// Snapshot for `status`
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub transmission_running: bool,
    pub field_monitor_running: bool,
    pub pull_monitor_running: bool,
    pub counts: StatusCounts,
    /// Empty when the engine runs against a non-HTTP transport
    pub tokens: Vec<TokenInfo>,
    pub last_pull_run: Option<DateTime<Utc>>,
}

/// Which loops `start_all` brings up
#[derive(Debug, Clone, Copy)]
struct EnabledLoops {
    transmission: bool,
    field_monitor: bool,
    pull_monitor: bool,
}

pub struct SyncEngine {
    repo: SharedGuideRepository,
    client: Option<Arc<RemoteClient>>,
    transmitter: SyncService<Transmitter>,
    field_monitor: SyncService<FieldMonitor>,
    pull_monitor: SyncService<PullMonitor>,
    enabled: EnabledLoops,
}

impl SyncEngine {
    /// Build the loops over an existing store and transport
    pub fn new(config: &Config, repo: SharedGuideRepository, transport: SharedTransport) -> Self {
        let payloads = Arc::new(PayloadBuilder::new(
            config.hospital.clone(),
            config.attachments.base_path.clone(),
        ));

        let transmitter = Transmitter::new(
            repo.clone(),
            transport.clone(),
            payloads.clone(),
            config.transmission.clone(),
        );
        let field_monitor = FieldMonitor::new(
            repo.clone(),
            transport.clone(),
            payloads,
            config.field_monitor.clone(),
        );
        let pull_monitor = PullMonitor::new(repo.clone(), transport, config.pull_monitor.clone());

        Self {
            transmitter: SyncService::new(Arc::new(transmitter), config.transmission.interval()),
            field_monitor: SyncService::new(Arc::new(field_monitor), config.field_monitor.interval()),
            pull_monitor: SyncService::new(Arc::new(pull_monitor), config.pull_monitor.interval()),
            enabled: EnabledLoops {
                transmission: config.transmission.enabled,
                field_monitor: config.field_monitor.enabled,
                pull_monitor: config.pull_monitor.enabled,
            },
            client: None,
            repo,
        }
    }

    /// Open the configured SQLite store and HTTP client
    pub fn connect(config: &Config) -> Result<Self> {
        let repo = create_sqlite_repository(&config.database.sqlite_path)?;
        let client = Arc::new(RemoteClient::new(&config.remote, &config.token)?);

        let mut engine = Self::new(config, repo, client.clone());
        engine.client = Some(client);
        Ok(engine)
    }

    pub fn repository(&self) -> &SharedGuideRepository {
        &self.repo
    }

    pub fn client(&self) -> Option<&Arc<RemoteClient>> {
        self.client.as_ref()
    }

    pub fn transmitter(&self) -> &SyncService<Transmitter> {
        &self.transmitter
    }

    pub fn field_monitor(&self) -> &SyncService<FieldMonitor> {
        &self.field_monitor
    }

    pub fn pull_monitor(&self) -> &SyncService<PullMonitor> {
        &self.pull_monitor
    }

    /// Start every enabled loop; returns how many were started
    pub fn start_all(&self) -> usize {
        let mut started = 0;

        if self.enabled.transmission && self.transmitter.start() {
            started += 1;
        }
        if self.enabled.field_monitor && self.field_monitor.start() {
            started += 1;
        }
        if self.enabled.pull_monitor && self.pull_monitor.start() {
            started += 1;
        }

        tracing::info!(started, "Sync engine started");
        started
    }

    /// Stop all loops, letting in-flight cycles finish
    pub async fn stop_all(&self) {
        tokio::join!(
            self.transmitter.stop(),
            self.field_monitor.stop(),
            self.pull_monitor.stop(),
        );
        tracing::info!("Sync engine stopped");
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let tokens = match &self.client {
            Some(client) => client.token_info().await,
            None => Vec::new(),
        };

        Ok(EngineStatus {
            transmission_running: self.transmitter.is_running(),
            field_monitor_running: self.field_monitor.is_running(),
            pull_monitor_running: self.pull_monitor.is_running(),
            counts: self.repo.status_counts()?,
            tokens,
            last_pull_run: self.pull_monitor.cycle().guard().last_run_at(),
        })
    }
}
