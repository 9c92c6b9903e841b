//! Error types for the record pipeline, the model contract and the orchestrators

use std::path::PathBuf;

/// レコード入力まわりのエラー
#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    /// 入力ファイルを開けない
    #[error("Failed to open record input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 交差検証の分割パラメータが不正
    #[error("Invalid fold {fold_id} of {num_folds} (need num_folds >= 2 and fold_id < num_folds)")]
    InvalidFold { fold_id: usize, num_folds: usize },

    /// 前のパスの Reader がまだ生きているのに次のパスを始めようとした
    #[error("Previous pass over the shuffled cache is still in flight")]
    PassInFlight,
}

/// Result type for record input operations
pub type RecordResult<T> = Result<T, RecordError>;

/// モデル層のエラー（構築・推論・学習・保存）
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    /// クエリ JSON の形式が不正
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// 割り当て JSON の形式が不正
    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    /// クエリに存在しない変数への割り当て
    #[error("Assignment refers to variable {0} which is not part of the query")]
    UnknownVariable(i64),

    /// モデルファイルの入出力エラー
    #[error("Model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// モデルファイルのシリアライズ / デシリアライズ失敗
    #[error("Model file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// 学習・評価パスの致命的エラー
#[derive(thiserror::Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// ワーカースレッドが panic した
    #[error("Worker thread {0} panicked")]
    WorkerPanicked(usize),

    /// 設定値の不整合
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for orchestration
pub type TrainResult<T> = Result<T, TrainError>;
