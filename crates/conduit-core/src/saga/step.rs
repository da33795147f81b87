//! SagaStep - action と compensation の組
//!
//! # 設計原則
//! - action / compensation は object-safe な async trait（`StepAction`, `Compensation`）
//! - クロージャは `action_fn` / `compensation_fn` で trait object にする
//! - 失敗は `Result<_, ExecError>` で返し、ErrorKind でリトライ可否を決める
//! - timeout とリトライ方針は step ごとに持つ（未指定なら `DEFAULT_STEP_TIMEOUT`）

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::SagaContext;
use crate::domain::ExecError;
use crate::queue::RetryPolicy;

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Forward action of a step. The returned value is merged into the context.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn execute(&self, ctx: &SagaContext) -> Result<Value, ExecError>;
}

/// Logical inverse of a step's action.
#[async_trait]
pub trait Compensation: Send + Sync {
    async fn compensate(&self, ctx: &SagaContext) -> Result<(), ExecError>;
}

/// Adapter turning an async closure into a `StepAction`.
pub struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(SagaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecError>> + Send,
{
    async fn execute(&self, ctx: &SagaContext) -> Result<Value, ExecError> {
        (self.0)(ctx.clone()).await
    }
}

/// Adapter turning an async closure into a `Compensation`.
pub struct FnCompensation<F>(F);

#[async_trait]
impl<F, Fut> Compensation for FnCompensation<F>
where
    F: Fn(SagaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecError>> + Send,
{
    async fn compensate(&self, ctx: &SagaContext) -> Result<(), ExecError> {
        (self.0)(ctx.clone()).await
    }
}

pub fn action_fn<F, Fut>(f: F) -> Arc<dyn StepAction>
where
    F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecError>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

pub fn compensation_fn<F, Fut>(f: F) -> Arc<dyn Compensation>
where
    F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ExecError>> + Send + 'static,
{
    Arc::new(FnCompensation(f))
}

/// Attempts allowed for one action, and the wait between them.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    pub backoff: RetryPolicy,
}

impl StepRetryPolicy {
    pub fn new(max_attempts: u32, backoff: RetryPolicy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, RetryPolicy::immediate())
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for StepRetryPolicy {
    fn default() -> Self {
        Self::new(3, RetryPolicy::exponential(Duration::from_millis(100)))
    }
}

/// One step of a saga definition.
#[derive(Clone)]
pub struct SagaStep {
    pub name: String,
    pub action: Arc<dyn StepAction>,
    pub compensation: Option<Arc<dyn Compensation>>,
    pub timeout: Duration,
    pub retry_policy: StepRetryPolicy,
}

impl SagaStep {
    pub fn new(name: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
        Self {
            name: name.into(),
            action,
            compensation: None,
            timeout: DEFAULT_STEP_TIMEOUT,
            retry_policy: StepRetryPolicy::default(),
        }
    }

    pub fn compensate_with(mut self, compensation: Arc<dyn Compensation>) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry_policy: StepRetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("has_compensation", &self.compensation.is_some())
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_adapters_run() {
        let action = action_fn(|ctx: SagaContext| async move {
            let n = ctx.get_as::<u32>("n")?.unwrap_or(0);
            Ok::<_, ExecError>(json!({ "n": n + 1 }))
        });
        let compensation = compensation_fn(|_ctx: SagaContext| async { Ok::<_, ExecError>(()) });

        let ctx = SagaContext::from_value(json!({"n": 1}));
        assert_eq!(action.execute(&ctx).await.unwrap(), json!({"n": 2}));
        assert!(compensation.compensate(&ctx).await.is_ok());
    }

    #[test]
    fn attempts_never_drop_below_one() {
        let policy = StepRetryPolicy::new(0, RetryPolicy::immediate());
        assert_eq!(policy.attempts(), 1);
        assert_eq!(StepRetryPolicy::default().attempts(), 3);
    }
}
