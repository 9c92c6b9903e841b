use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gtrain_core::{
    CrossValidation, FileInput, FoldSubset, GraphModel, PrecisionStats, RunConfig, RunMode,
    ShuffledCacheInput, StructuredLogger, Trainer, evaluate, inference_score_gain,
};
use gtrain_model::PairwiseModel;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and evaluate structured prediction graph models")]
struct Cli {
    /// TOML 設定ファイル（コマンドラインの指定が優先）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 入力データ（1 行 1 JSON、`.gz` 可、`-` で stdin）
    #[arg(long)]
    input: Option<PathBuf>,

    /// モデルファイルの接頭辞
    #[arg(long)]
    out_model: Option<PathBuf>,

    /// Hogwild 並列で処理する
    #[arg(long, action = clap::ArgAction::Set)]
    hogwild: Option<bool>,

    /// ワーカースレッド数
    #[arg(long)]
    num_threads: Option<usize>,

    /// 学習パス数の上限
    #[arg(long)]
    num_training_passes: Option<usize>,

    #[arg(long)]
    start_learning_rate: Option<f64>,

    /// 学習率がこれを下回ったら打ち切る
    #[arg(long)]
    stop_learning_rate: Option<f64>,

    #[arg(long)]
    regularization_const: Option<f64>,

    #[arg(long)]
    svm_margin: Option<f64>,

    /// 2 以上なら交差検証
    #[arg(long)]
    cross_validation_folds: Option<usize>,

    /// 学習せず、保存済みモデルを評価する
    #[arg(long)]
    evaluate: bool,

    /// シャッフルのシード
    #[arg(long)]
    seed: Option<u64>,

    /// 交差検証の各 fold で評価する部分集合
    #[arg(long, value_enum)]
    cv_eval_subset: Option<CvEvalSubset>,

    /// パスごとの結果を JSONL で追記する（`-` で stdout）
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// 評価時に推論によるスコア改善量も測る
    #[arg(long)]
    score_gain: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CvEvalSubset {
    HeldOut,
    Training,
}

impl From<CvEvalSubset> for FoldSubset {
    fn from(v: CvEvalSubset) -> Self {
        match v {
            CvEvalSubset::HeldOut => FoldSubset::HeldOut,
            CvEvalSubset::Training => FoldSubset::Training,
        }
    }
}

impl Cli {
    /// 既定値 → 設定ファイル → コマンドラインの順に重ねる
    fn run_config(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?
            }
            None => RunConfig::default(),
        };
        if let Some(v) = &self.input {
            cfg.input = v.clone();
        }
        if let Some(v) = &self.out_model {
            cfg.out_model = v.clone();
        }
        if let Some(v) = self.hogwild {
            cfg.hogwild = v;
        }
        if let Some(v) = self.num_threads {
            cfg.num_threads = v;
        }
        if let Some(v) = self.num_training_passes {
            cfg.num_training_passes = v;
        }
        if let Some(v) = self.start_learning_rate {
            cfg.start_learning_rate = v;
        }
        if let Some(v) = self.stop_learning_rate {
            cfg.stop_learning_rate = v;
        }
        if let Some(v) = self.regularization_const {
            cfg.regularization_const = v;
        }
        if let Some(v) = self.svm_margin {
            cfg.svm_margin = v;
        }
        if let Some(v) = self.cross_validation_folds {
            cfg.cross_validation_folds = v;
        }
        if self.evaluate {
            cfg.evaluate = true;
        }
        if let Some(v) = self.seed {
            cfg.seed = Some(v);
        }
        if let Some(v) = self.cv_eval_subset {
            cfg.cv_eval_subset = v.into();
        }
        if let Some(v) = &self.metrics_out {
            cfg.metrics_out = Some(v.clone());
        }
        if self.score_gain {
            cfg.score_gain = true;
        }
        Ok(cfg)
    }
}

fn run_train(cfg: &RunConfig, metrics: Option<&StructuredLogger>) -> Result<()> {
    let trainer = Trainer::new(cfg.train_options(), cfg.parallel()).with_metrics(metrics);
    let mut input = ShuffledCacheInput::new(Box::new(FileInput::new(&cfg.input)), cfg.seed);
    let mut model = PairwiseModel::new();

    trainer
        .init(&mut input, &mut model)
        .with_context(|| format!("building the model from {}", cfg.input.display()))?;
    let report = trainer.train(&mut input, &mut model).context("training")?;
    log::info!(
        "Training finished after {} passes (best error rate {:.6}, learning rate {})",
        report.passes.len(),
        report.best_error_rate,
        report.final_learning_rate
    );

    model
        .save_model(&cfg.out_model)
        .with_context(|| format!("saving the model to {}", cfg.out_model.display()))?;
    Ok(())
}

fn run_evaluate(cfg: &RunConfig, metrics: Option<&StructuredLogger>) -> Result<()> {
    let model = PairwiseModel::load_model(&cfg.out_model)
        .with_context(|| format!("loading the model {}", cfg.out_model.display()))?;
    let mut input = FileInput::new(&cfg.input);

    let mut total = PrecisionStats::default();
    let stats = evaluate(&mut input, &model, &cfg.parallel(), &mut total).context("evaluation")?;
    if let Some(metrics) = metrics {
        metrics.write_json(&json!({
            "event": "evaluate",
            "stats": stats,
            "error_rate": stats.error_rate(),
        }));
    }

    if cfg.score_gain {
        let gain = inference_score_gain(&mut input, &model)
            .context("measuring inference score gain")?;
        if let Some(metrics) = metrics {
            metrics.write_json(&json!({
                "event": "score_gain",
                "records": gain.records,
                "score_gain": gain.score_gain,
                "elapsed_ms": gain.elapsed.as_millis() as u64,
            }));
        }
    }
    Ok(())
}

fn run_cross_validation(
    cfg: &RunConfig,
    num_folds: usize,
    metrics: Option<&StructuredLogger>,
) -> Result<()> {
    let cv = CrossValidation {
        num_folds,
        options: cfg.train_options(),
        parallel: cfg.parallel(),
        eval_subset: cfg.cv_eval_subset,
        seed: cfg.seed,
    };
    cv.run(|| Box::new(FileInput::new(&cfg.input)), PairwiseModel::new, metrics)
        .context("cross-validation")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let cfg = cli.run_config()?;
    cfg.validate().context("invalid configuration")?;
    log::debug!("{cfg:?}");

    let metrics = match &cfg.metrics_out {
        Some(path) => Some(
            StructuredLogger::new(path)
                .with_context(|| format!("opening metrics log {}", path.display()))?,
        ),
        None => None,
    };

    let start = Instant::now();
    let metrics = metrics.as_ref();
    match cfg.mode() {
        RunMode::CrossValidation { num_folds } => run_cross_validation(&cfg, num_folds, metrics)?,
        RunMode::Evaluate => run_evaluate(&cfg, metrics)?,
        RunMode::Train => run_train(&cfg, metrics)?,
    }
    log::info!("Done in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}
