//! 評価パス
//!
//! モデルを変更せずに、推論結果と正解ラベルを比べて精度を測る。

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::ParallelConfig;
use crate::driver::{foreach_record, parallel_foreach_record};
use crate::error::TrainResult;
use crate::model::GraphModel;
use crate::record::RecordInput;
use crate::stats::{PrecisionStats, SharedPrecisionStats};

/// 1 パスで評価し、結果を `total` にも加算する。
///
/// 各レコードについて、推論対象のラベルを消してから MAP 推論した割り当てと、
/// JSON のままの割り当て（正解）を比較する。
pub fn evaluate<M: GraphModel>(
    input: &mut dyn RecordInput,
    model: &M,
    parallel: &ParallelConfig,
    total: &mut PrecisionStats,
) -> TrainResult<PrecisionStats> {
    let shared = SharedPrecisionStats::default();
    let start = Instant::now();
    parallel_foreach_record(input, parallel, |query, assign| {
        let q = model.create_query(query)?;
        let mut inferred = model.create_assignment(&q, assign)?;
        let reference = model.create_assignment(&q, assign)?;
        model.clear_inferred(&mut inferred);
        model.map_inference(&q, &mut inferred)?;
        shared.add(model.compare_assignments(&inferred, &reference));
        Ok(())
    })?;
    log::info!("Evaluation pass took {}ms.", start.elapsed().as_millis());

    let stats = shared.snapshot();
    log::info!("Correct {} vs {} incorrect labels", stats.correct_labels, stats.incorrect_labels);
    log::info!("Error rate of {:.6}", stats.error_rate());

    total.add_stats(stats);
    Ok(stats)
}

/// [`inference_score_gain`] の結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreGain {
    pub records: usize,
    /// 推論後スコア − 推論前スコア の総和
    pub score_gain: f64,
    pub elapsed: Duration,
}

/// JSON の割り当てを初期値として MAP 推論し、スコアがどれだけ上がるかを測る。
///
/// 推論の速度と探索の効き具合を見るための逐次パス。
pub fn inference_score_gain<M: GraphModel>(
    input: &mut dyn RecordInput,
    model: &M,
) -> TrainResult<ScoreGain> {
    let start = Instant::now();
    let gain = Mutex::new(0.0f64);
    let summary = foreach_record(input, |query, assign| {
        let q = model.create_query(query)?;
        let mut a = model.create_assignment(&q, assign)?;
        let start_score = model.assignment_score(&q, &a);
        model.map_inference(&q, &mut a)?;
        let delta = model.assignment_score(&q, &a) - start_score;
        *gain.lock().unwrap_or_else(|e| e.into_inner()) += delta;
        Ok(())
    })?;
    let elapsed = start.elapsed();
    let score_gain = gain.into_inner().unwrap_or_else(|e| e.into_inner());
    log::info!("Inference took {}ms for gain of {score_gain}.", elapsed.as_millis());
    Ok(ScoreGain {
        records: summary.records,
        score_gain,
        elapsed,
    })
}
