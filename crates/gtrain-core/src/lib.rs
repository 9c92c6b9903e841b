//! gtrain-core: 構造化予測モデルの学習・評価ドライバ
//!
//! JSONL 形式のレコードファイルを読み、Hogwild 方式の並列パスで学習を繰り返す。
//!
//! - [`record`]: レコードの Reader / Input（ファイル、キャッシュ＋シャッフル、交差検証の分割）
//! - [`driver`]: レコードを `(query, assign)` の JSON に分解してハンドラへ配る並列ドライバ
//! - [`train`] / [`eval`] / [`cross_validation`]: 学習・評価・交差検証のオーケストレーション
//! - [`model`]: オーケストレーションが要求するモデル側の契約

pub mod config;
pub mod cross_validation;
pub mod driver;
pub mod error;
pub mod eval;
pub mod io;
pub mod logging;
pub mod model;
pub mod record;
pub mod stats;
pub mod train;

pub use config::{ParallelConfig, RunConfig, RunMode, TrainOptions};
pub use cross_validation::{CrossValidation, CrossValidationReport, FoldReport};
pub use driver::{PassSummary, foreach_record, parallel_foreach_record};
pub use error::{ModelError, ModelResult, RecordError, RecordResult, TrainError, TrainResult};
pub use eval::{ScoreGain, evaluate, inference_score_gain};
pub use logging::StructuredLogger;
pub use model::GraphModel;
pub use record::{
    CrossValidationInput, FileInput, FoldSpec, FoldSubset, RecordInput, RecordReader,
    ShuffledCacheInput,
};
pub use stats::{PrecisionStats, SharedPrecisionStats};
pub use train::{LearningRateSchedule, PassRecord, PassVerdict, TrainReport, Trainer};
