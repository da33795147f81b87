//! WorkerPool - consume → handle → complete / fail のループ
//!
//! # 設計原則
//! - 中央スケジューラなし。各ワーカーが独立に consume する
//! - handler は別タスクで実行し、panic も `fail` に回す
//! - handler にも timeout をかける
//! - handler を始める直前に所有権を更新し、recovery に回収済みなら実行しない
//! - shutdown は新しい consume を止めるだけで、実行中の handler は最後まで走らせる

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::App;
use crate::domain::{ExecError, Task};
use crate::queue::{Delivery, FailOutcome, QueueError, TaskQueue};
use crate::typed::DynHandler;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Worker ids are `{id_prefix}-{n}`; they double as consumer names.
    pub id_prefix: String,
    pub batch_size: usize,
    pub block_timeout: Duration,
    pub handler_timeout: Duration,
    /// Pause after a store error before consuming again.
    pub error_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            id_prefix: "worker".to_string(),
            batch_size: 1,
            block_timeout: Duration::from_secs(5),
            handler_timeout: Duration::from_secs(300),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Worker pool handle.
/// - `request_shutdown()` でワーカー全体が止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, queue: Arc<TaskQueue>, app: Arc<App>, options: WorkerOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let worker_id = format!("{}-{i}", options.id_prefix);
            let q = Arc::clone(&queue);
            let a = Arc::clone(&app);
            let opts = options.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, a, opts, &mut rx).await;
            });
            joins.push(join);
        }
        info!(workers = n, "worker pool started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: String,
    queue: Arc<TaskQueue>,
    app: Arc<App>,
    options: WorkerOptions,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id = %worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // consume は待つ可能性があるので select で shutdown と競合させる
        let batch = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            batch = queue.consume(&worker_id, options.batch_size, options.block_timeout) => batch,
        };

        let deliveries = match batch {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "consume failed");
                tokio::time::sleep(options.error_backoff).await;
                continue;
            }
        };

        for delivery in deliveries {
            if let Err(e) = process_delivery(&worker_id, &queue, &app, &options, delivery).await {
                // the entry stays pending; recovery hands it to someone else
                error!(worker_id = %worker_id, error = %e, "could not report task result");
            }
        }
    }
    debug!(worker_id = %worker_id, "worker stopped");
}

/// Run the handler for one delivery and report the outcome to the queue.
pub async fn process_delivery(
    worker_id: &str,
    queue: &TaskQueue,
    app: &App,
    options: &WorkerOptions,
    delivery: Delivery,
) -> Result<(), QueueError> {
    let Delivery { handle, task } = delivery;

    // later deliveries of a batch have been idle since the read
    if !queue.renew(&handle, worker_id).await? {
        warn!(worker_id, task_id = %task.id, "delivery was reclaimed before it started, skipped");
        return Ok(());
    }

    let Some(handler) = app.handler(task.task_type.as_str()) else {
        warn!(worker_id, task_id = %task.id, task_type = %task.task_type, "no handler registered");
        let reason = format!("no handler registered for task type '{}'", task.task_type);
        queue.fail(&handle, &task, &reason).await?;
        return Ok(());
    };

    match run_handler(handler, task.clone(), options.handler_timeout).await {
        Ok(result) => {
            queue.complete(&handle, Some(result)).await?;
        }
        Err(e) => {
            let outcome = queue.fail(&handle, &task, &e.to_string()).await?;
            if outcome == FailOutcome::DeadLettered {
                warn!(worker_id, task_id = %task.id, "task gave up after last attempt");
            }
        }
    }
    Ok(())
}

async fn run_handler(
    handler: Arc<dyn DynHandler>,
    task: Task,
    limit: Duration,
) -> Result<Value, ExecError> {
    let mut join = tokio::spawn(async move { handler.handle_dyn(&task).await });
    match tokio::time::timeout(limit, &mut join).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_panic() => Err(ExecError::permanent(format!(
            "handler panicked: {}",
            panic_message(e.into_panic())
        ))),
        Ok(Err(e)) => Err(ExecError::infrastructure(format!("handler cancelled: {e}"))),
        Err(_) => {
            join.abort();
            Err(ExecError::timeout(format!("handler exceeded {limit:?}")))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
