//! ラベル単位の正解・不正解カウンタ

use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// 正解ラベル数と不正解ラベル数の組
///
/// 加算は可換かつ結合的で、パス内・fold 間の集計はすべて加算で行う。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionStats {
    pub correct_labels: u64,
    pub incorrect_labels: u64,
}

impl PrecisionStats {
    pub fn new(correct_labels: u64, incorrect_labels: u64) -> Self {
        Self {
            correct_labels,
            incorrect_labels,
        }
    }

    pub fn total_labels(&self) -> u64 {
        self.correct_labels + self.incorrect_labels
    }

    /// `incorrect / (correct + incorrect)`。ラベルが 1 つもなければ 0.0
    pub fn error_rate(&self) -> f64 {
        let total = self.total_labels();
        if total == 0 { 0.0 } else { self.incorrect_labels as f64 / total as f64 }
    }

    pub fn add_stats(&mut self, other: PrecisionStats) {
        *self += other;
    }
}

impl Add for PrecisionStats {
    type Output = PrecisionStats;

    fn add(self, rhs: PrecisionStats) -> PrecisionStats {
        PrecisionStats {
            correct_labels: self.correct_labels + rhs.correct_labels,
            incorrect_labels: self.incorrect_labels + rhs.incorrect_labels,
        }
    }
}

impl AddAssign for PrecisionStats {
    fn add_assign(&mut self, rhs: PrecisionStats) {
        self.correct_labels += rhs.correct_labels;
        self.incorrect_labels += rhs.incorrect_labels;
    }
}

impl Sum for PrecisionStats {
    fn sum<I: Iterator<Item = PrecisionStats>>(iter: I) -> PrecisionStats {
        iter.fold(PrecisionStats::default(), Add::add)
    }
}

/// ワーカー間で共有する lock-free な集計器
#[derive(Debug, Default)]
pub struct SharedPrecisionStats {
    correct_labels: AtomicU64,
    incorrect_labels: AtomicU64,
}

impl SharedPrecisionStats {
    pub fn add(&self, stats: PrecisionStats) {
        self.correct_labels.fetch_add(stats.correct_labels, Ordering::Relaxed);
        self.incorrect_labels.fetch_add(stats.incorrect_labels, Ordering::Relaxed);
    }

    /// 現在値を読む。並列パスの join 後に呼べば確定値
    pub fn snapshot(&self) -> PrecisionStats {
        PrecisionStats {
            correct_labels: self.correct_labels.load(Ordering::Relaxed),
            incorrect_labels: self.incorrect_labels.load(Ordering::Relaxed),
        }
    }
}
