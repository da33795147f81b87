//! TaskPayload trait - 型付き payload の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// TaskPayload は task_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct RunBacktest {
///     strategy: String,
/// }
///
/// impl TaskPayload for RunBacktest {
///     const TYPE: &'static str = "quant.backtest.run.v1";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: lane に載せる JSON payload を作るため
/// - `DeserializeOwned`: handler に渡す前に復元するため（'static に対応）
/// - `Send + Sync`: 複数ワーカーから安全に使えるため
/// - `'static`: Arc に格納できるため（参照を持たない）
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type の定義
    ///
    /// # 命名規約
    /// - `{namespace}.{domain}.{action}.v{major}`
    /// - 例: `acme.billing.charge.v1`
    const TYPE: &'static str;
}
