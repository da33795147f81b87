//! RecoveryMonitor - 放置された in-flight タスクの定期回収
//!
//! # フロー
//! 1. `interval` ごとに `TaskQueue::recover_pending` を実行
//! 2. orchestrator が設定されていれば、保持期間を過ぎた終了済み saga を purge
//!
//! `tick()` を直接呼べばループなしで 1 回分を実行できます（テストで FixedClock と組み合わせる）。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::queue::{QueueError, RecoveryReport, TaskQueue};
use crate::saga::{SagaError, SagaOrchestrator};

#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Consumer name used when claiming stale entries.
    pub recoverer: String,
    pub interval: Duration,
    /// How long an entry may sit unacknowledged before it is reclaimed.
    pub idle_threshold: Duration,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            recoverer: "recovery-monitor".to_string(),
            interval: Duration::from_secs(30),
            idle_threshold: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub recovery: RecoveryReport,
    pub sagas_purged: usize,
}

pub struct RecoveryMonitor {
    queue: Arc<TaskQueue>,
    options: RecoveryOptions,
    saga_retention: Option<(Arc<SagaOrchestrator>, Duration)>,
}

impl RecoveryMonitor {
    pub fn new(queue: Arc<TaskQueue>, options: RecoveryOptions) -> Self {
        Self {
            queue,
            options,
            saga_retention: None,
        }
    }

    /// Also purge finished sagas older than `retention` on every tick.
    pub fn with_saga_retention(
        mut self,
        orchestrator: Arc<SagaOrchestrator>,
        retention: Duration,
    ) -> Self {
        self.saga_retention = Some((orchestrator, retention));
        self
    }

    pub async fn tick(&self) -> Result<TickReport, MonitorError> {
        let recovery = self
            .queue
            .recover_pending(&self.options.recoverer, self.options.idle_threshold)
            .await?;
        let sagas_purged = match &self.saga_retention {
            Some((orchestrator, retention)) => orchestrator.purge_finished(*retention).await?,
            None => 0,
        };
        Ok(TickReport {
            recovery,
            sagas_purged,
        })
    }

    /// Run `tick` every `interval` until shut down.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            info!(
                interval_ms = self.options.interval.as_millis() as u64,
                idle_threshold_ms = self.options.idle_threshold.as_millis() as u64,
                "recovery monitor started"
            );
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = tokio::time::sleep(self.options.interval) => {}
                }
                match self.tick().await {
                    Ok(report) => debug!(?report, "recovery tick"),
                    Err(e) => error!(error = %e, "recovery tick failed"),
                }
            }
            info!("recovery monitor stopped");
        });
        MonitorHandle { shutdown_tx, join }
    }
}

pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "recovery monitor ended abnormally");
        }
    }
}
