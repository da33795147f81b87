//! conduit CLI - デモ用のエントリポイント
//!
//! - `demo`: in-memory log store の上で WorkerPool と RecoveryMonitor を動かす
//! - `saga-demo`: create_user → charge_payment → send_email の saga を 1 回実行する

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use conduit_core::app::{AppBuilder, RecoveryMonitor, WorkerPool};
use conduit_core::config::ConduitConfig;
use conduit_core::domain::{ExecError, Priority, TaskId};
use conduit_core::impls::{FileCheckpointStore, InMemoryCheckpointStore, InMemoryLogStore};
use conduit_core::ports::{CheckpointStore, SystemClock, UlidGenerator};
use conduit_core::queue::TaskQueue;
use conduit_core::saga::{
    SagaContext, SagaDefinition, SagaOrchestrator, SagaStep, action_fn, compensation_fn,
};
use conduit_core::typed::{Handler, TaskPayload};

#[derive(Parser)]
#[command(name = "conduit", version, about = "Priority task queue and saga orchestration demo")]
struct Cli {
    /// Path to conduit.toml (defaults are used if it does not exist).
    #[arg(short, long, default_value = "conduit.toml", global = true)]
    config: PathBuf,

    /// Log level when RUST_LOG is not set.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a batch of tasks through a worker pool and print the stats.
    Demo {
        /// Overrides `workers.count`.
        #[arg(short, long)]
        workers: Option<usize>,

        /// How many times the hello handler fails before succeeding.
        #[arg(long, default_value_t = 2)]
        fail_times: u32,

        /// Hello tasks to enqueue, spread over all priorities.
        #[arg(long, default_value_t = 8)]
        tasks: usize,
    },

    /// Run the signup saga once and print the result.
    SagaDemo {
        /// Step that fails permanently (create_user, charge_payment or send_email).
        #[arg(long)]
        fail_at: Option<String>,

        /// Keep checkpoints as JSON files in this directory.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl TaskPayload for Hello {
    const TYPE: &'static str = "demo.hello.v1";
}

/// Fails the first `n` calls, then greets.
struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, task: Hello) -> Result<Value, ExecError> {
        let left = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if let Ok(left) = left {
            return Err(ExecError::transient(format!(
                "intentional failure (left={left})"
            )));
        }
        info!(name = %task.name, "hello");
        Ok(json!({ "greeting": format!("Hello, {}!", task.name) }))
    }
}

const SIGNUP_TASK: &str = "demo.signup.v1";

fn signup_saga(config: &ConduitConfig, fail_at: Option<&str>) -> anyhow::Result<SagaDefinition> {
    let step = |name: &'static str, output: Value| {
        let fails = fail_at == Some(name);
        SagaStep::new(
            name,
            action_fn(move |ctx: SagaContext| {
                let output = output.clone();
                async move {
                    if fails {
                        return Err(ExecError::permanent(format!("{name} rejected")));
                    }
                    info!(step = name, user = ?ctx.get("email"), "step done");
                    Ok(output)
                }
            }),
        )
        .timeout(config.step_timeout())
        .retry(config.step_retry_policy())
    };
    let undo = |name: &'static str| {
        compensation_fn(move |_ctx: SagaContext| async move {
            warn!(step = name, "compensating");
            Ok::<_, ExecError>(())
        })
    };

    Ok(SagaDefinition::builder("signup")
        .step(step("create_user", json!({ "user_id": "u-1001" })).compensate_with(undo("create_user")))
        .step(
            step("charge_payment", json!({ "charge_id": "ch-42" }))
                .compensate_with(undo("charge_payment")),
        )
        .step(step("send_email", json!({ "email_sent": true })))
        .build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let config = ConduitConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Demo {
            workers,
            fail_times,
            tasks,
        } => run_demo(&config, workers.unwrap_or(config.workers.count), fail_times, tasks).await,
        Commands::SagaDemo {
            fail_at,
            checkpoint_dir,
        } => run_saga_demo(&config, fail_at.as_deref(), checkpoint_dir).await,
    }
}

async fn run_demo(
    config: &ConduitConfig,
    workers: usize,
    fail_times: u32,
    tasks: usize,
) -> anyhow::Result<()> {
    // (A) store / queue / orchestrator を用意
    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let store = Arc::new(InMemoryLogStore::new(clock.clone()));
    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::new(InMemoryCheckpointStore::new()),
        clock.clone(),
        ids.clone(),
    ));

    // (B) handler と workflow を登録
    let app = AppBuilder::new()
        .register::<Hello, _>(HelloHandler::new(fail_times))?
        .workflow(SIGNUP_TASK, signup_saga(config, None)?, orchestrator.clone())?
        .expect_tasks(&[Hello::TYPE, SIGNUP_TASK])
        .build()?;
    let app = Arc::new(app);

    let queue = TaskQueue::open(store, clock, ids, config.queue_config())
        .await?
        .with_known_types(app.registered_types());
    let queue = Arc::new(queue);

    // (C) タスク投入
    let mut submitted: Vec<TaskId> = Vec::with_capacity(tasks + 1);
    for i in 0..tasks {
        let priority = Priority::ALL[i % Priority::ALL.len()];
        let hello = Hello {
            name: format!("task-{i}"),
        };
        submitted.push(queue.enqueue_typed(&hello, priority).await?);
    }
    submitted.push(
        queue
            .enqueue(SIGNUP_TASK, json!({ "email": "ada@example.com" }), Priority::High)
            .await?,
    );
    info!(count = submitted.len(), "tasks enqueued");

    // (D) worker と recovery monitor を起動
    let pool = WorkerPool::spawn(workers, queue.clone(), app, config.worker_options());
    let monitor = RecoveryMonitor::new(queue.clone(), config.recovery_options())
        .with_saga_retention(orchestrator.clone(), config.saga_retention())
        .spawn();

    // (E) 全タスクが終端状態になるまでポーリング
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        let done = submitted.iter().all(|id| {
            queue
                .task_status(*id)
                .is_some_and(|view| view.status.is_terminal())
        });
        if done {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("gave up waiting for tasks to finish");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pool.shutdown_and_join().await;
    monitor.shutdown_and_join().await;

    let statuses: Vec<_> = submitted
        .iter()
        .filter_map(|id| queue.task_status(*id))
        .collect();
    let report = json!({
        "tasks": statuses,
        "queue": queue.stats().await?,
        "sagas": orchestrator.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_saga_demo(
    config: &ConduitConfig,
    fail_at: Option<&str>,
    checkpoint_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let checkpoints: Arc<dyn CheckpointStore> = match checkpoint_dir {
        Some(dir) => Arc::new(FileCheckpointStore::open(dir).await?),
        None => Arc::new(InMemoryCheckpointStore::new()),
    };
    let orchestrator = SagaOrchestrator::new(checkpoints, clock, ids);

    let definition = signup_saga(config, fail_at)?;
    let mut ctx = SagaContext::new();
    ctx.insert("email", json!("ada@example.com"));

    let result = orchestrator.execute(&definition, ctx).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
