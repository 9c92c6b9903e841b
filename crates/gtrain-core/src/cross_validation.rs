//! k-fold 交差検証
//!
//! fold ごとに新しいモデルを作り、学習側の部分集合で構築・学習し、
//! 検証側の部分集合で評価した結果を合算する。モデルは保存しない。

use serde::Serialize;
use serde_json::json;

use crate::config::{ParallelConfig, TrainOptions};
use crate::error::TrainResult;
use crate::eval::evaluate;
use crate::logging::StructuredLogger;
use crate::model::GraphModel;
use crate::record::{CrossValidationInput, FoldSpec, FoldSubset, RecordInput, ShuffledCacheInput};
use crate::stats::PrecisionStats;
use crate::train::{TrainReport, Trainer};

/// 交差検証の設定
#[derive(Debug, Clone, Copy)]
pub struct CrossValidation {
    pub num_folds: usize,
    pub options: TrainOptions,
    pub parallel: ParallelConfig,
    /// 各 fold の評価に使う部分集合（通常は [`FoldSubset::HeldOut`]）
    pub eval_subset: FoldSubset,
    pub seed: Option<u64>,
}

/// 1 fold 分の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldReport {
    pub fold_id: usize,
    /// モデル構築に使ったレコード数
    pub training_records: usize,
    pub train: TrainReport,
    pub stats: PrecisionStats,
}

/// 交差検証全体の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationReport {
    pub folds: Vec<FoldReport>,
    pub total: PrecisionStats,
}

impl CrossValidation {
    /// `base_input` は fold ごとに 2 回（学習用・評価用）呼ばれ、元のレコード列を返す Input を作る。
    /// `new_model` は fold ごとに未学習のモデルを作る。
    pub fn run<M, B, N>(
        &self,
        base_input: B,
        mut new_model: N,
        metrics: Option<&StructuredLogger>,
    ) -> TrainResult<CrossValidationReport>
    where
        M: GraphModel,
        B: Fn() -> Box<dyn RecordInput>,
        N: FnMut() -> M,
    {
        let trainer = Trainer::new(self.options, self.parallel).with_metrics(metrics);
        let mut total = PrecisionStats::default();
        let mut folds = Vec::with_capacity(self.num_folds);

        for fold_id in 0..self.num_folds {
            let fold = FoldSpec::new(fold_id, self.num_folds)?;
            let seed = self.seed.map(|s| s.wrapping_add(fold_id as u64));
            let mut training = ShuffledCacheInput::new(
                Box::new(CrossValidationInput::new(base_input(), fold, FoldSubset::Training)),
                seed,
            );
            let mut validation = ShuffledCacheInput::new(
                Box::new(CrossValidationInput::new(base_input(), fold, self.eval_subset)),
                seed,
            );

            let mut model = new_model();
            log::info!("Training fold {fold_id}");
            let training_records = trainer.init(&mut training, &mut model)?;
            let train = trainer.train(&mut training, &mut model)?;

            log::info!("Evaluating fold {fold_id}");
            let stats = evaluate(&mut validation, &model, &self.parallel, &mut total)?;

            let report = FoldReport {
                fold_id,
                training_records,
                train,
                stats,
            };
            if let Some(metrics) = metrics {
                metrics.write_json(&json!({
                    "event": "cv_fold",
                    "fold_id": fold_id,
                    "training_records": training_records,
                    "stats": stats,
                    "error_rate": stats.error_rate(),
                }));
            }
            folds.push(report);
        }

        log::info!("========================================");
        log::info!("Cross-validation done");
        log::info!(
            "Correct {} vs {} incorrect labels for the whole dataset",
            total.correct_labels,
            total.incorrect_labels
        );
        log::info!("Error rate of {:.6}", total.error_rate());
        if let Some(metrics) = metrics {
            metrics.write_json(&json!({
                "event": "cv_total",
                "stats": total,
                "error_rate": total.error_rate(),
            }));
        }

        Ok(CrossValidationReport { folds, total })
    }
}
