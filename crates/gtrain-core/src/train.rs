//! 学習ループ
//!
//! パス単位で Hogwild 学習を回す。各パスの前にモデルをスナップショットし、
//! 誤り率が悪化したらスナップショットへ戻して学習率を半分にする。
//! 学習率が停止しきい値を下回ったら残りのパスは行わない。

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::config::{ParallelConfig, TrainOptions};
use crate::driver::parallel_foreach_record;
use crate::error::TrainResult;
use crate::logging::StructuredLogger;
use crate::model::GraphModel;
use crate::record::RecordInput;
use crate::stats::{PrecisionStats, SharedPrecisionStats};

/// 1 パスの結果に対する判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassVerdict {
    /// 誤り率が悪化しなかった。更新を採用
    Accepted,
    /// 悪化したので更新を破棄し、学習率を半減
    Reverted,
    /// 破棄した上で学習率が停止しきい値を下回った
    Stopped,
}

/// 学習率と最良誤り率の状態
///
/// パス間でのみ更新され、ワーカーからは触らない。
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateSchedule {
    learning_rate: f64,
    stop_learning_rate: f64,
    best_error_rate: f64,
}

impl LearningRateSchedule {
    pub fn new(start_learning_rate: f64, stop_learning_rate: f64) -> Self {
        Self {
            learning_rate: start_learning_rate,
            stop_learning_rate,
            best_error_rate: 1.0,
        }
    }

    /// 次のパスで使う学習率
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// これまでに採用したパスの最小誤り率（初期値 1.0）
    pub fn best_error_rate(&self) -> f64 {
        self.best_error_rate
    }

    /// パスの集計を反映する
    ///
    /// 比較したラベルが 1 つもないパスは誤り率が定まらないので、最良誤り率を更新せずに採用する。
    pub fn observe(&mut self, stats: &PrecisionStats) -> PassVerdict {
        if stats.total_labels() == 0 {
            return PassVerdict::Accepted;
        }
        let error_rate = stats.error_rate();
        if error_rate > self.best_error_rate {
            self.learning_rate *= 0.5;
            if self.learning_rate < self.stop_learning_rate {
                PassVerdict::Stopped
            } else {
                PassVerdict::Reverted
            }
        } else {
            self.best_error_rate = error_rate;
            PassVerdict::Accepted
        }
    }
}

/// 1 パス分の記録
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassRecord {
    pub pass: usize,
    /// このパスで使った学習率
    pub learning_rate: f64,
    pub records: usize,
    pub stats: PrecisionStats,
    pub error_rate: f64,
    pub verdict: PassVerdict,
    pub elapsed_ms: u64,
}

/// 学習全体の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainReport {
    pub passes: Vec<PassRecord>,
    pub final_learning_rate: f64,
    pub best_error_rate: f64,
}

impl TrainReport {
    /// 学習率の下限に達して途中で打ち切ったか
    pub fn stopped_early(&self) -> bool {
        self.passes.last().is_some_and(|p| p.verdict == PassVerdict::Stopped)
    }
}

/// トレーナー
pub struct Trainer<'a> {
    options: TrainOptions,
    parallel: ParallelConfig,
    metrics: Option<&'a StructuredLogger>,
}

impl<'a> Trainer<'a> {
    pub fn new(options: TrainOptions, parallel: ParallelConfig) -> Self {
        Self {
            options,
            parallel,
            metrics: None,
        }
    }

    /// パスごとの結果を JSONL にも書き出す
    pub fn with_metrics(mut self, metrics: Option<&'a StructuredLogger>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    pub fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }

    /// 学習データでモデルを構築する（初回パスの前に 1 度だけ）
    ///
    /// 語彙の追加などは並行実行できないため、ワーカーを使う場合でも
    /// モデル構築の呼び出しはロックで直列化する。取り込んだレコード数を返す。
    pub fn init<M: GraphModel>(
        &self,
        input: &mut dyn RecordInput,
        model: &mut M,
    ) -> TrainResult<usize> {
        let summary = {
            let guarded = Mutex::new(&mut *model);
            parallel_foreach_record(input, &self.parallel, |query, assign| {
                let mut model = guarded.lock().unwrap_or_else(|e| e.into_inner());
                model.add_query_to_model(query, assign)
            })?
        };
        log::info!("Loaded {} training data samples.", summary.records);
        model.prepare_for_inference();
        Ok(summary.records)
    }

    /// 学習パスを回す
    pub fn train<M: GraphModel>(
        &self,
        input: &mut dyn RecordInput,
        model: &mut M,
    ) -> TrainResult<TrainReport> {
        let opts = &self.options;
        model.ssvm_init(opts.regularization_const, opts.svm_margin);
        log::info!(
            "Starting training with --start_learning_rate={:.6}, \
             --regularization_const={:.6} and --svm_margin={:.6}",
            opts.start_learning_rate,
            opts.regularization_const,
            opts.svm_margin
        );

        let mut schedule =
            LearningRateSchedule::new(opts.start_learning_rate, opts.stop_learning_rate);
        let mut passes = Vec::with_capacity(opts.num_training_passes);

        for pass in 0..opts.num_training_passes {
            let snapshot = model.clone();
            let learning_rate = schedule.learning_rate();
            let shared = SharedPrecisionStats::default();

            let start = Instant::now();
            let summary = {
                let model: &M = model;
                parallel_foreach_record(input, &self.parallel, |query, assign| {
                    let q = model.create_query(query)?;
                    let a = model.create_assignment(&q, assign)?;
                    shared.add(model.ssvm_learn(&q, &a, learning_rate)?);
                    Ok(())
                })?
            };
            let elapsed = start.elapsed();

            let stats = shared.snapshot();
            let error_rate = stats.error_rate();
            log::info!("Training pass took {}ms.", elapsed.as_millis());
            log::info!(
                "Correct {} vs {} incorrect labels.",
                stats.correct_labels,
                stats.incorrect_labels
            );
            log::info!(
                "Pass {pass} with learning rate {learning_rate} has error rate of {error_rate:.6}"
            );

            if stats.total_labels() == 0 {
                log::warn!("Pass {pass} compared no labels; keeping best error rate unchanged");
            }
            let verdict = schedule.observe(&stats);
            if verdict != PassVerdict::Accepted {
                log::info!("Reverting last pass.");
                *model = snapshot;
            }

            let record = PassRecord {
                pass,
                learning_rate,
                records: summary.records,
                stats,
                error_rate,
                verdict,
                elapsed_ms: elapsed.as_millis() as u64,
            };
            if let Some(metrics) = self.metrics {
                metrics.write_json(&json!({ "event": "train_pass", "result": &record }));
            }
            passes.push(record);

            if verdict == PassVerdict::Stopped {
                log::info!(
                    "Learning rate {} is below --stop_learning_rate={}; stopping after pass {pass}",
                    schedule.learning_rate(),
                    opts.stop_learning_rate
                );
                break;
            }
            model.prepare_for_inference();
        }

        Ok(TrainReport {
            passes,
            final_learning_rate: schedule.learning_rate(),
            best_error_rate: schedule.best_error_rate(),
        })
    }
}
