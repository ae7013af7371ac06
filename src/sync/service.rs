//! Periodic task lifecycle
//!
//! Each loop is a [`SyncCycle`] driven by its own [`SyncService`]: one spawned
//! task, one timer, one shutdown channel. Cycles never overlap and shutdown is
//! only observed between cycles, so in-flight remote calls finish (or time
//! out) before the task exits.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncErrorTrait};

/// Tallies for one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Guides looked at
    pub examined: usize,
    /// Guides accepted by the remote side
    pub succeeded: usize,
    /// Guides left for the next cycle after a transient failure
    pub retried: usize,
    /// Guides moved to `Error`
    pub failed: usize,
    /// Guides whose observation ended
    pub finalized: usize,
    /// Guides with reconciled fields
    pub updated: usize,
    /// Guides skipped because another writer moved them
    pub conflicts: usize,
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The cycle declined to run; try again after `retry_after`
    Skipped { retry_after: Duration },
}

/// One periodic unit of work
#[async_trait]
pub trait SyncCycle: Send + Sync + 'static {
    /// Loop name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Runs once when the service starts, before the first cycle
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn run_cycle(&self) -> Result<CycleOutcome>;
}

struct RunningTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Owns the background task of one loop
pub struct SyncService<C: SyncCycle> {
    cycle: Arc<C>,
    interval: Duration,
    task: Mutex<Option<RunningTask>>,
}

impl<C: SyncCycle> SyncService<C> {
    pub fn new(cycle: Arc<C>, interval: Duration) -> Self {
        Self {
            cycle,
            interval,
            task: Mutex::new(None),
        }
    }

    /// The wrapped cycle
    pub fn cycle(&self) -> &Arc<C> {
        &self.cycle
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn task(&self) -> MutexGuard<'_, Option<RunningTask>> {
        // The slot holds no invariant a panic could break
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the loop; returns `false` if it is already running
    pub fn start(&self) -> bool {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::debug!(service = self.cycle.name(), "Service already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.cycle.clone(), self.interval, shutdown_rx));
        *task = Some(RunningTask { handle, shutdown });

        tracing::info!(
            service = self.cycle.name(),
            interval_secs = self.interval.as_secs(),
            "Service started"
        );
        true
    }

    /// Signal shutdown and wait for the current cycle to finish
    pub async fn stop(&self) {
        let running = self.task().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(service = self.cycle.name(), error = %e, "Service task panicked");
        }
        tracing::info!(service = self.cycle.name(), "Service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Run a single cycle in the caller's task
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        self.cycle.run_cycle().await
    }
}

async fn run_loop<C: SyncCycle>(cycle: Arc<C>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let name = cycle.name();

    if let Err(e) = cycle.on_start().await {
        tracing::warn!(service = name, error = %e, "Startup step failed");
    }

    loop {
        let wait = match cycle.run_cycle().await {
            Ok(CycleOutcome::Completed(report)) => {
                tracing::info!(
                    service = name,
                    examined = report.examined,
                    succeeded = report.succeeded,
                    retried = report.retried,
                    failed = report.failed,
                    finalized = report.finalized,
                    updated = report.updated,
                    "Cycle completed"
                );
                interval
            }
            Ok(CycleOutcome::Skipped { retry_after }) => {
                tracing::warn!(
                    service = name,
                    retry_after_secs = retry_after.as_secs(),
                    "Cycle skipped"
                );
                retry_after
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    service = name,
                    category = e.category().as_str(),
                    error = %e,
                    "Cycle failed, retrying next interval"
                );
                interval
            }
            Err(e) => {
                tracing::error!(
                    service = name,
                    category = e.category().as_str(),
                    error = %e,
                    "Cycle failed"
                );
                interval
            }
        };

        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown_rx.changed() => {
                tracing::debug!(service = name, "Shutdown received");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::Error;
    use crate::remote::RemoteFailure;

    struct Counting {
        runs: AtomicUsize,
        started: AtomicUsize,
        skip_first: bool,
    }

    /// Fails every cycle, alternating recoverable and fatal errors
    struct Failing {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl SyncCycle for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run_cycle(&self) -> Result<CycleOutcome> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(Error::from(RemoteFailure::transient("connection reset")))
            } else {
                Err(Error::config("send_url is not set"))
            }
        }
    }

    #[async_trait]
    impl SyncCycle for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_start(&self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_cycle(&self) -> Result<CycleOutcome> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.skip_first && n == 0 {
                return Ok(CycleOutcome::Skipped {
                    retry_after: Duration::from_secs(1),
                });
            }
            Ok(CycleOutcome::Completed(CycleReport::default()))
        }
    }

    fn counting(skip_first: bool) -> Arc<Counting> {
        Arc::new(Counting {
            runs: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            skip_first,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_stopped() {
        let cycle = counting(false);
        let service = SyncService::new(cycle.clone(), Duration::from_secs(60));

        assert!(service.start());
        assert!(!service.start());
        assert!(service.is_running());

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);
        assert_eq!(cycle.started.load(Ordering::SeqCst), 1);

        service.stop().await;
        assert!(!service.is_running());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_cycle_retries_sooner() {
        let cycle = counting(true);
        let service = SyncService::new(cycle.clone(), Duration::from_secs(300));
        service.start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 2);

        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let cycle = counting(false);
        let service = SyncService::new(cycle.clone(), Duration::from_secs(60));

        service.start();
        service.stop().await;
        assert!(service.start());
        service.stop().await;

        assert_eq!(cycle.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_keep_the_loop_alive() {
        let cycle = Arc::new(Failing {
            runs: AtomicUsize::new(0),
        });
        let service = SyncService::new(cycle.clone(), Duration::from_secs(10));
        service.start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 4);
        assert!(service.is_running());

        service.stop().await;
    }

    #[tokio::test]
    async fn test_run_once() {
        let cycle = counting(false);
        let service = SyncService::new(cycle.clone(), Duration::from_secs(60));

        let outcome = service.run_once().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        assert!(!service.is_running());
    }
}
