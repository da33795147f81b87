//! Errors - 実行エラーの分類
//!
//! Handler と saga step はどちらも `Result<_, ExecError>` を返します。
//! 例外ではなく値として失敗を返すことで、リトライ判断を `ErrorKind` で分岐できます。

use serde::{Deserialize, Serialize};

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（saga step ではリトライしない）
/// - Timeout: 制限時間超過（Transient と同様に試行回数に数える）
/// - Infrastructure: インフラエラー（store の障害など）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Timeout,
    Infrastructure,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Failure reported by a task handler or a saga action/compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct ExecError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ExecError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, detail)
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, detail)
    }

    pub fn infrastructure(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, detail)
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(e: serde_json::Error) -> Self {
        ExecError::permanent(format!("json decode: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_permanent_is_not_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Infrastructure.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
    }

    #[test]
    fn display_includes_kind_and_detail() {
        let e = ExecError::timeout("step exceeded 5s");
        assert_eq!(e.to_string(), "Timeout: step exceeded 5s");
    }

    #[test]
    fn decode_errors_are_permanent() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let e: ExecError = err.into();
        assert_eq!(e.kind, ErrorKind::Permanent);
        assert!(e.detail.starts_with("json decode"));
    }
}
