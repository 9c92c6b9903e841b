//! 実行設定
//!
//! 既定値 → TOML 設定ファイル → コマンドライン引数 の順に上書きする。
//! コマンドライン側の上書きはバイナリ crate が行う。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{TrainError, TrainResult};
use crate::record::FoldSubset;

/// パス内の並列化設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Hogwild 並列で回すか（false なら単一スレッドでファイル順）
    pub hogwild: bool,
    /// Hogwild 時のワーカースレッド数
    pub num_threads: usize,
}

impl ParallelConfig {
    pub fn sequential() -> Self {
        Self {
            hogwild: false,
            num_threads: 1,
        }
    }

    pub fn hogwild(num_threads: usize) -> Self {
        Self {
            hogwild: true,
            num_threads,
        }
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::hogwild(8)
    }
}

/// 学習ループの設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOptions {
    /// パス数
    pub num_training_passes: usize,
    /// 初期学習率
    pub start_learning_rate: f64,
    /// 学習率がこれを下回ったら学習を打ち切る
    pub stop_learning_rate: f64,
    /// 正則化定数（大きいほど強く正則化）
    pub regularization_const: f64,
    /// SVM マージン（学習時、正解と同じラベルを保つことへのペナルティ）
    pub svm_margin: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            num_training_passes: 24,
            start_learning_rate: 0.1,
            stop_learning_rate: 0.0001,
            regularization_const: 2.0,
            svm_margin: 0.1,
        }
    }
}

/// 実行モード（互いに排他）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// `num_folds` 分割の交差検証。モデルは保存しない
    CrossValidation { num_folds: usize },
    /// 保存済みモデルの評価のみ
    Evaluate,
    /// 学習してモデルを保存
    Train,
}

/// 実行設定全体
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// 学習・評価データ（JSONL、`.gz` 可）
    pub input: PathBuf,
    /// モデルファイルの接頭辞
    pub out_model: PathBuf,
    pub hogwild: bool,
    pub num_threads: usize,
    pub num_training_passes: usize,
    pub start_learning_rate: f64,
    pub stop_learning_rate: f64,
    pub regularization_const: f64,
    pub svm_margin: f64,
    /// 2 以上で交差検証
    pub cross_validation_folds: usize,
    /// 学習せず評価だけ行う
    pub evaluate: bool,
    /// シャッフルのシード（省略時は実行ごとに変わる）
    pub seed: Option<u64>,
    /// 交差検証で各 fold の評価に使う部分集合
    pub cv_eval_subset: FoldSubset,
    /// パスごとの JSONL ログの出力先（`-` で stdout）
    pub metrics_out: Option<PathBuf>,
    /// 評価モードで推論によるスコア改善量も測る
    pub score_gain: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let parallel = ParallelConfig::default();
        let train = TrainOptions::default();
        Self {
            input: PathBuf::from("testdata"),
            out_model: PathBuf::from("model"),
            hogwild: parallel.hogwild,
            num_threads: parallel.num_threads,
            num_training_passes: train.num_training_passes,
            start_learning_rate: train.start_learning_rate,
            stop_learning_rate: train.stop_learning_rate,
            regularization_const: train.regularization_const,
            svm_margin: train.svm_margin,
            cross_validation_folds: 0,
            evaluate: false,
            seed: None,
            cv_eval_subset: FoldSubset::HeldOut,
            metrics_out: None,
            score_gain: false,
        }
    }
}

impl RunConfig {
    /// TOML 文字列から読む。書かれていない項目は既定値
    pub fn from_toml_str(text: &str) -> TrainResult<Self> {
        toml::from_str(text).map_err(|e| TrainError::InvalidConfig(e.to_string()))
    }

    /// TOML 設定ファイルから読む
    pub fn load<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| {
                TrainError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
            })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> TrainResult<()> {
        let invalid = |msg: String| Err(TrainError::InvalidConfig(msg));
        if self.num_threads == 0 {
            return invalid("num_threads must be at least 1".into());
        }
        if !(self.start_learning_rate > 0.0) {
            return invalid(format!(
                "start_learning_rate must be positive, got {}",
                self.start_learning_rate
            ));
        }
        if !(self.stop_learning_rate > 0.0) {
            return invalid(format!(
                "stop_learning_rate must be positive, got {}",
                self.stop_learning_rate
            ));
        }
        if self.stop_learning_rate > self.start_learning_rate {
            return invalid(format!(
                "stop_learning_rate ({}) exceeds start_learning_rate ({})",
                self.stop_learning_rate, self.start_learning_rate
            ));
        }
        if self.cross_validation_folds == 1 {
            return invalid("cross_validation_folds must be 0 (disabled) or at least 2".into());
        }
        if self.regularization_const < 0.0 || self.svm_margin < 0.0 {
            return invalid("regularization_const and svm_margin must not be negative".into());
        }
        // stdin は一度しか読めないので、入力を複数回開くモードでは使えない
        if self.input.as_os_str() == "-" {
            match self.mode() {
                RunMode::CrossValidation { .. } => {
                    return invalid("input \"-\" cannot be reread for each fold".into());
                }
                RunMode::Evaluate if self.score_gain => {
                    return invalid("input \"-\" cannot be reread for score_gain".into());
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn mode(&self) -> RunMode {
        if self.cross_validation_folds > 1 {
            RunMode::CrossValidation {
                num_folds: self.cross_validation_folds,
            }
        } else if self.evaluate {
            RunMode::Evaluate
        } else {
            RunMode::Train
        }
    }

    pub fn parallel(&self) -> ParallelConfig {
        ParallelConfig {
            hogwild: self.hogwild,
            num_threads: self.num_threads,
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            num_training_passes: self.num_training_passes,
            start_learning_rate: self.start_learning_rate,
            stop_learning_rate: self.stop_learning_rate,
            regularization_const: self.regularization_const,
            svm_margin: self.svm_margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.input, PathBuf::from("testdata"));
        assert!(cfg.hogwild);
        assert_eq!(cfg.num_threads, 8);
        assert_eq!(cfg.num_training_passes, 24);
        assert_eq!(cfg.start_learning_rate, 0.1);
        assert_eq!(cfg.stop_learning_rate, 0.0001);
        assert_eq!(cfg.mode(), RunMode::Train);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = RunConfig::from_toml_str(
            r#"
            input = "train.jsonl.gz"
            num_threads = 2
            cv_eval_subset = "training"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.input, PathBuf::from("train.jsonl.gz"));
        assert_eq!(cfg.num_threads, 2);
        assert_eq!(cfg.cv_eval_subset, FoldSubset::Training);
        assert_eq!(cfg.svm_margin, 0.1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RunConfig::from_toml_str("num_thread = 3").unwrap_err();
        assert!(matches!(err, TrainError::InvalidConfig(_)));
    }

    #[test]
    fn mode_precedence() {
        let mut cfg = RunConfig {
            evaluate: true,
            ..RunConfig::default()
        };
        assert_eq!(cfg.mode(), RunMode::Evaluate);
        cfg.cross_validation_folds = 5;
        assert_eq!(cfg.mode(), RunMode::CrossValidation { num_folds: 5 });
    }

    #[test]
    fn validation_errors() {
        let bad = [
            RunConfig {
                num_threads: 0,
                ..RunConfig::default()
            },
            RunConfig {
                start_learning_rate: 0.0,
                ..RunConfig::default()
            },
            RunConfig {
                stop_learning_rate: 0.5,
                ..RunConfig::default()
            },
            RunConfig {
                cross_validation_folds: 1,
                ..RunConfig::default()
            },
            RunConfig {
                svm_margin: -1.0,
                ..RunConfig::default()
            },
            RunConfig {
                input: "-".into(),
                cross_validation_folds: 3,
                ..RunConfig::default()
            },
            RunConfig {
                input: "-".into(),
                evaluate: true,
                score_gain: true,
                ..RunConfig::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }

        // 1 回しか読まないモードなら stdin でよい
        for evaluate in [false, true] {
            let cfg = RunConfig {
                input: "-".into(),
                evaluate,
                ..RunConfig::default()
            };
            assert!(cfg.validate().is_ok(), "{cfg:?}");
        }
    }
}
