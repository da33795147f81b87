//! Config - `conduit.toml` から読み込む実行時設定
//!
//! 各セクションは `#[serde(default)]` なので、書かれていない値はデフォルトになります。
//! 時間はすべてミリ秒で書きます。
//!
//! ```toml
//! [queue]
//! namespace = "billing"
//! base_delay_ms = 500
//!
//! [workers]
//! count = 8
//! ```
//!
//! 環境変数 `CONDUIT_NAMESPACE` はファイルの `queue.namespace` より優先されます。
//!
//! `recovery.idle_threshold_ms` は `workers.handler_timeout_ms` より長くなければなりません。
//! 短いと、まだ動いている handler のタスクを recovery が別ワーカーに渡してしまいます。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{RecoveryOptions, WorkerOptions};
use crate::queue::{QueueConfig, RetryPolicy};
use crate::saga::StepRetryPolicy;

pub const NAMESPACE_ENV: &str = "CONDUIT_NAMESPACE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub queue: QueueSection,
    pub saga: SagaSection,
    pub recovery: RecoverySection,
    pub workers: WorkersSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub namespace: String,
    pub group: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub default_max_retries: u32,
    pub poll_interval_ms: u64,
    pub max_recoveries: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            namespace: queue.namespace,
            group: queue.group,
            base_delay_ms: millis(queue.retry_policy.base_delay),
            max_delay_ms: millis(queue.retry_policy.max_delay),
            multiplier: queue.retry_policy.multiplier,
            default_max_retries: queue.default_max_retries,
            poll_interval_ms: millis(queue.poll_interval),
            max_recoveries: queue.max_recoveries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaSection {
    pub step_timeout_ms: u64,
    /// Total attempts per step action, first one included.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Finished sagas older than this are purged by the recovery monitor.
    pub retention_ms: u64,
}

impl Default for SagaSection {
    fn default() -> Self {
        let retry = StepRetryPolicy::default();
        Self {
            step_timeout_ms: millis(crate::saga::DEFAULT_STEP_TIMEOUT),
            max_attempts: retry.max_attempts,
            backoff_ms: millis(retry.backoff.base_delay),
            retention_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub interval_ms: u64,
    pub idle_threshold_ms: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        let options = RecoveryOptions::default();
        Self {
            interval_ms: millis(options.interval),
            idle_threshold_ms: millis(options.idle_threshold),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    pub count: usize,
    pub batch_size: usize,
    pub block_timeout_ms: u64,
    pub handler_timeout_ms: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        let options = WorkerOptions::default();
        Self {
            count: 4,
            batch_size: options.batch_size,
            block_timeout_ms: millis(options.block_timeout),
            handler_timeout_ms: millis(options.handler_timeout),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ConduitConfig {
    /// Read `path`, or use defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Self::parse(&contents)?
        } else {
            Self::default()
        };
        config.override_namespace(std::env::var(NAMESPACE_ENV).ok());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that break the queue's ownership guarantees.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "workers.batch_size must be at least 1".to_string(),
            ));
        }
        if self.recovery.idle_threshold_ms <= self.workers.handler_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "recovery.idle_threshold_ms ({}) must be greater than workers.handler_timeout_ms ({})",
                self.recovery.idle_threshold_ms, self.workers.handler_timeout_ms
            )));
        }
        Ok(())
    }

    /// Empty values leave the namespace alone.
    pub fn override_namespace(&mut self, namespace: Option<String>) {
        if let Some(ns) = namespace
            && !ns.is_empty()
        {
            self.queue.namespace = ns;
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        let q = &self.queue;
        QueueConfig {
            namespace: q.namespace.clone(),
            group: q.group.clone(),
            retry_policy: RetryPolicy {
                base_delay: Duration::from_millis(q.base_delay_ms),
                multiplier: q.multiplier,
                max_delay: Duration::from_millis(q.max_delay_ms),
            },
            default_max_retries: q.default_max_retries,
            poll_interval: Duration::from_millis(q.poll_interval_ms),
            max_recoveries: q.max_recoveries,
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            batch_size: self.workers.batch_size,
            block_timeout: Duration::from_millis(self.workers.block_timeout_ms),
            handler_timeout: Duration::from_millis(self.workers.handler_timeout_ms),
            ..WorkerOptions::default()
        }
    }

    pub fn recovery_options(&self) -> RecoveryOptions {
        RecoveryOptions {
            interval: Duration::from_millis(self.recovery.interval_ms),
            idle_threshold: Duration::from_millis(self.recovery.idle_threshold_ms),
            ..RecoveryOptions::default()
        }
    }

    /// Retry policy for saga steps that do not set their own.
    pub fn step_retry_policy(&self) -> StepRetryPolicy {
        StepRetryPolicy::new(
            self.saga.max_attempts,
            RetryPolicy::exponential(Duration::from_millis(self.saga.backoff_ms)),
        )
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.saga.step_timeout_ms)
    }

    pub fn saga_retention(&self) -> Duration {
        Duration::from_millis(self.saga.retention_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_component_defaults() {
        let config = ConduitConfig::default();
        assert_eq!(config.queue_config(), QueueConfig::default());
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.saga.max_attempts, 3);
        assert_eq!(config.step_timeout(), crate::saga::DEFAULT_STEP_TIMEOUT);
        assert_eq!(config.recovery_options().idle_threshold, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = ConduitConfig::parse(
            r#"
            [queue]
            namespace = "billing"
            base_delay_ms = 500

            [workers]
            count = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.namespace, "billing");
        assert_eq!(config.queue.group, "workers");
        assert_eq!(
            config.queue_config().retry_policy.base_delay,
            Duration::from_millis(500)
        );
        assert_eq!(config.workers.count, 8);
        assert_eq!(config.workers.batch_size, 1);
        assert_eq!(config.saga, SagaSection::default());
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = ConduitConfig::parse("[queue]\nnamespace = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConduitConfig::load(dir.path().join("conduit.toml")).unwrap();
        assert_eq!(config.queue.group, "workers");
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        std::fs::write(&path, "[recovery]\ninterval_ms = 1000\n").unwrap();

        let config = ConduitConfig::load(&path).unwrap();
        assert_eq!(config.recovery_options().interval, Duration::from_secs(1));
    }

    #[rstest]
    #[case::equal_to_handler_timeout(300_000, 300_000, 1)]
    #[case::below_handler_timeout(60_000, 300_000, 1)]
    #[case::empty_batch(600_000, 300_000, 0)]
    fn unsafe_combinations_are_rejected(
        #[case] idle_threshold_ms: u64,
        #[case] handler_timeout_ms: u64,
        #[case] batch_size: usize,
    ) {
        let toml = format!(
            "[recovery]\nidle_threshold_ms = {idle_threshold_ms}\n\n\
             [workers]\nhandler_timeout_ms = {handler_timeout_ms}\nbatch_size = {batch_size}\n"
        );
        let err = ConduitConfig::parse(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn invalid_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        std::fs::write(&path, "[workers]\nhandler_timeout_ms = 900000\n").unwrap();

        let err = ConduitConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("idle_threshold_ms"));
    }

    #[rstest]
    #[case::set(Some("tenant-a"), "tenant-a")]
    #[case::empty(Some(""), "conduit")]
    #[case::unset(None, "conduit")]
    fn namespace_override(#[case] value: Option<&str>, #[case] expected: &str) {
        let mut config = ConduitConfig::default();
        config.override_namespace(value.map(str::to_string));
        assert_eq!(config.queue.namespace, expected);
    }
}
