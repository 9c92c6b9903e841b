//! オーケストレーションが要求するモデル側の契約
//!
//! 推論・学習の数値計算やグラフ表現はモデル実装に任せ、ここでは
//! ドライバから呼ばれる操作だけを定める。

use std::path::Path;

use serde_json::Value;

use crate::error::ModelResult;
use crate::stats::PrecisionStats;

/// 学習・評価対象のグラフモデル
///
/// # 並行性
///
/// Hogwild パスでは `&self` を取る操作（特に [`GraphModel::ssvm_learn`]）が
/// 複数ワーカーから同時に呼ばれる。実装は重みを atomic などで保持し、
/// 互いの更新が多少古く見えることを許容すること。
/// `&mut self` を取る操作（モデル構築・推論準備）は排他的に呼ばれる。
///
/// `Clone` はパス前のスナップショットに使うため、完全な値コピーであること。
pub trait GraphModel: Clone + Send + Sync {
    /// 推論対象の問題（グラフ構造）
    type Query: Send;
    /// クエリの各変数へのラベル割り当て
    type Assignment: Send;

    fn create_query(&self, json: &Value) -> ModelResult<Self::Query>;

    fn create_assignment(&self, query: &Self::Query, json: &Value) -> ModelResult<Self::Assignment>;

    /// 現在の重みでの割り当てのスコア
    fn assignment_score(&self, query: &Self::Query, assignment: &Self::Assignment) -> f64;

    /// 推論対象の変数を MAP 推論で埋める
    fn map_inference(
        &self,
        query: &Self::Query,
        assignment: &mut Self::Assignment,
    ) -> ModelResult<()>;

    /// 推論対象の変数のラベルを消す
    fn clear_inferred(&self, assignment: &mut Self::Assignment);

    /// `inferred` を `reference` と比べ、推論対象の位置ごとに正解・不正解を数える
    fn compare_assignments(
        &self,
        inferred: &Self::Assignment,
        reference: &Self::Assignment,
    ) -> PrecisionStats;

    /// SSVM 学習のハイパーパラメータを設定する
    fn ssvm_init(&mut self, regularization_const: f64, svm_margin: f64);

    /// 1 レコード分の SSVM 劣勾配更新。更新前の推論結果の正誤を返す
    fn ssvm_learn(
        &self,
        query: &Self::Query,
        assignment: &Self::Assignment,
        learning_rate: f64,
    ) -> ModelResult<PrecisionStats>;

    /// 学習データをモデル構築（語彙・特徴量の登録）に使う
    fn add_query_to_model(&mut self, query: &Value, assignment: &Value) -> ModelResult<()>;

    /// 推論用の補助構造を作り直す
    fn prepare_for_inference(&mut self);

    fn load_model(prefix: &Path) -> ModelResult<Self>;

    fn save_model(&self, prefix: &Path) -> ModelResult<()>;
}
