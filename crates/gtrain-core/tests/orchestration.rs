//! 学習・評価・交差検証のオーケストレーションを、振る舞いが台本どおりのモデルで確かめる

mod common;

use std::sync::atomic::Ordering;

use common::{MockModel, record_lines, write_records};
use gtrain_core::{
    CrossValidation, FileInput, FoldSubset, ModelError, ParallelConfig, PassVerdict,
    PrecisionStats, ShuffledCacheInput, TrainError, TrainOptions, Trainer, evaluate,
};

const N: usize = 20;

fn options(passes: usize, start: f64, stop: f64) -> TrainOptions {
    TrainOptions {
        num_training_passes: passes,
        start_learning_rate: start,
        stop_learning_rate: stop,
        ..TrainOptions::default()
    }
}

fn ids(n: usize) -> Vec<u64> {
    (0..n as u64).collect()
}

#[test]
fn sequential_pass_visits_file_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(100, None));
    let trainer = Trainer::new(options(1, 0.1, 0.0001), ParallelConfig::sequential());
    let mut input = FileInput::new(&path);
    let mut model = MockModel::new(Vec::new(), 100);

    let report = trainer.train(&mut input, &mut model).unwrap();

    assert_eq!(model.probe.learn_calls.load(Ordering::SeqCst), 100);
    assert_eq!(*model.probe.learned_ids.lock().unwrap(), ids(100));
    assert_eq!(report.passes.len(), 1);
    assert_eq!(report.passes[0].records, 100);
    assert_eq!(model.ssvm, Some((2.0, 0.1)));
}

#[test]
fn hogwild_passes_deliver_every_record_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(200, None));
    let trainer = Trainer::new(options(3, 0.1, 0.0001), ParallelConfig::hogwild(4));
    let mut input = ShuffledCacheInput::new(Box::new(FileInput::new(&path)), Some(11));
    let mut model = MockModel::new(Vec::new(), 200);

    let report = trainer.train(&mut input, &mut model).unwrap();

    assert_eq!(model.probe.learn_calls.load(Ordering::SeqCst), 600);
    assert_eq!(model.updates(), 600);
    let mut seen = model.probe.learned_ids.lock().unwrap().clone();
    seen.sort_unstable();
    let expected: Vec<u64> = ids(200).into_iter().flat_map(|i| [i, i, i]).collect();
    assert_eq!(seen, expected);
    assert!(report.passes.iter().all(|p| p.verdict == PassVerdict::Accepted && p.records == 200));
}

#[test]
fn init_records_then_training_replays_shuffled_permutations() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(N, None));
    let trainer = Trainer::new(options(3, 0.1, 0.0001), ParallelConfig::sequential());
    let mut input = ShuffledCacheInput::new(Box::new(FileInput::new(&path)), Some(3));
    let mut model = MockModel::new(Vec::new(), N);

    let loaded = trainer.init(&mut input, &mut model).unwrap();
    assert_eq!(loaded, N);
    assert_eq!(model.vocabulary, ids(N));
    assert_eq!(model.prepared, 1);
    assert_eq!(input.cached_len(), Some(N));

    trainer.train(&mut input, &mut model).unwrap();
    let learned = model.probe.learned_ids.lock().unwrap().clone();
    assert_eq!(learned.len(), 3 * N);
    for pass in learned.chunks(N) {
        let mut sorted = pass.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ids(N));
    }
    assert_eq!(model.prepared, 4);
}

#[test]
fn init_under_hogwild_adds_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(500, None));
    let trainer = Trainer::new(TrainOptions::default(), ParallelConfig::hogwild(8));
    let mut input = FileInput::new(&path);
    let mut model = MockModel::new(Vec::new(), 500);

    assert_eq!(trainer.init(&mut input, &mut model).unwrap(), 500);
    let mut vocabulary = model.vocabulary.clone();
    vocabulary.sort_unstable();
    assert_eq!(vocabulary, ids(500));
}

#[test]
fn regressing_pass_is_rolled_back_and_halves_learning_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(N, None));
    let script = vec![(9, 1), (5, 5), (9, 1)];

    let mut rolled_back = MockModel::new(script.clone(), N);
    let trainer = Trainer::new(options(2, 0.1, 0.0001), ParallelConfig::sequential());
    trainer.init(&mut FileInput::new(&path), &mut rolled_back).unwrap();
    let report = trainer.train(&mut FileInput::new(&path), &mut rolled_back).unwrap();

    let mut one_pass = MockModel::new(script.clone(), N);
    let trainer = Trainer::new(options(1, 0.1, 0.0001), ParallelConfig::sequential());
    trainer.init(&mut FileInput::new(&path), &mut one_pass).unwrap();
    trainer.train(&mut FileInput::new(&path), &mut one_pass).unwrap();

    assert_eq!(report.passes[1].verdict, PassVerdict::Reverted);
    assert_eq!(rolled_back.state(), one_pass.state());
    // 巻き戻し後も推論の準備はやり直す
    assert_eq!(rolled_back.prepared, 3);
    assert_eq!(report.final_learning_rate, 0.05);
    assert_eq!(report.best_error_rate, 0.1);

    let mut model = MockModel::new(script, N);
    let trainer = Trainer::new(options(3, 0.1, 0.0001), ParallelConfig::sequential());
    let report = trainer.train(&mut FileInput::new(&path), &mut model).unwrap();
    let rates: Vec<f64> = report.passes.iter().map(|p| p.learning_rate).collect();
    assert_eq!(rates, vec![0.1, 0.1, 0.05]);
    let verdicts: Vec<PassVerdict> = report.passes.iter().map(|p| p.verdict).collect();
    assert_eq!(verdicts, vec![PassVerdict::Accepted, PassVerdict::Reverted, PassVerdict::Accepted]);
    let used = model.probe.learning_rates.lock().unwrap().clone();
    assert!(used[2 * N..].iter().all(|&lr| lr == 0.05));
}

#[test]
fn learning_rate_below_threshold_stops_training() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(N, None));
    let trainer = Trainer::new(options(5, 0.1, 0.08), ParallelConfig::sequential());
    let mut model = MockModel::new(vec![(9, 1), (5, 5), (9, 1)], N);

    trainer.init(&mut FileInput::new(&path), &mut model).unwrap();
    let report = trainer.train(&mut FileInput::new(&path), &mut model).unwrap();

    assert_eq!(report.passes.len(), 2);
    assert!(report.stopped_early());
    assert_eq!(report.passes[1].verdict, PassVerdict::Stopped);
    assert_eq!(report.final_learning_rate, 0.05);
    assert_eq!(model.probe.learn_calls.load(Ordering::SeqCst), 2 * N);
    // 採用されたのは最初のパスだけ
    assert_eq!(model.updates(), N as u64);
    assert_eq!(model.prepared, 2);
}

#[test]
fn pass_without_labels_does_not_set_the_bar() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "train.jsonl", &record_lines(N, None));
    let trainer = Trainer::new(options(3, 0.1, 0.0001), ParallelConfig::sequential());
    let mut model = MockModel::new(vec![(0, 0), (5, 5), (9, 1)], N);

    let report = trainer.train(&mut FileInput::new(&path), &mut model).unwrap();

    let verdicts: Vec<PassVerdict> = report.passes.iter().map(|p| p.verdict).collect();
    assert_eq!(verdicts, vec![PassVerdict::Accepted; 3]);
    assert_eq!(report.final_learning_rate, 0.1);
    assert_eq!(report.best_error_rate, 0.1);
    assert_eq!(model.updates(), 3 * N as u64);
}

#[test]
fn evaluation_is_repeatable_and_accumulates_total() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "test.jsonl", &record_lines(N, Some(4)));
    let model = MockModel::new(Vec::new(), N);
    let mut input = FileInput::new(&path);
    let mut total = PrecisionStats::default();

    let first = evaluate(&mut input, &model, &ParallelConfig::hogwild(4), &mut total).unwrap();
    let second = evaluate(&mut input, &model, &ParallelConfig::sequential(), &mut total).unwrap();

    assert_eq!(first, PrecisionStats::new(15, 5));
    assert_eq!(second, first);
    assert_eq!(total, PrecisionStats::new(30, 10));
    assert_eq!(model.updates(), 0);
}

#[test]
fn model_errors_abort_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let mut lines = record_lines(N, None);
    lines.insert(7, r#"{"query": {"name": "no id"}, "assign": {"label": 0}}"#.to_string());
    let path = write_records(&dir, "train.jsonl", &lines);
    let trainer = Trainer::new(options(2, 0.1, 0.0001), ParallelConfig::hogwild(2));
    let mut model = MockModel::new(Vec::new(), N);

    let err = trainer.train(&mut FileInput::new(&path), &mut model).unwrap_err();
    assert!(matches!(err, TrainError::Model(ModelError::InvalidQuery(_))), "{err}");
}

#[test]
fn malformed_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut lines = record_lines(N, None);
    lines.insert(3, "{not json".to_string());
    lines.insert(10, "]".to_string());
    let path = write_records(&dir, "train.jsonl", &lines);
    let trainer = Trainer::new(TrainOptions::default(), ParallelConfig::sequential());
    let mut model = MockModel::new(Vec::new(), N);

    assert_eq!(trainer.init(&mut FileInput::new(&path), &mut model).unwrap(), N);
    assert_eq!(model.vocabulary, ids(N));
}

fn cross_validation(eval_subset: FoldSubset) -> CrossValidation {
    CrossValidation {
        num_folds: 5,
        options: options(2, 0.1, 0.0001),
        parallel: ParallelConfig::sequential(),
        eval_subset,
        seed: Some(7),
    }
}

#[test]
fn cross_validation_holds_out_each_record_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "data.jsonl", &record_lines(50, None));
    let template = MockModel::new(Vec::new(), 40);

    let report = cross_validation(FoldSubset::HeldOut)
        .run(|| Box::new(FileInput::new(&path)), || template.clone(), None)
        .unwrap();

    assert_eq!(report.folds.len(), 5);
    let evaluated = template.probe.evaluated_ids.lock().unwrap().clone();
    for (k, fold) in report.folds.iter().enumerate() {
        assert_eq!(fold.fold_id, k);
        assert_eq!(fold.training_records, 40);
        assert_eq!(fold.stats.total_labels(), 10);
        let held_out = &evaluated[10 * k..10 * (k + 1)];
        assert!(held_out.iter().all(|&id| id % 5 == k as u64), "fold {k}: {held_out:?}");
    }
    let mut all = evaluated;
    all.sort_unstable();
    assert_eq!(all, ids(50));
    assert_eq!(report.total, PrecisionStats::new(50, 0));
    // fold ごとに新しいモデル
    assert_eq!(template.updates(), 0);
}

#[test]
fn cross_validation_can_evaluate_on_training_subset() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(&dir, "data.jsonl", &record_lines(50, Some(5)));
    let template = MockModel::new(Vec::new(), 40);

    let report = cross_validation(FoldSubset::Training)
        .run(|| Box::new(FileInput::new(&path)), || template.clone(), None)
        .unwrap();

    assert!(report.folds.iter().all(|f| f.stats.total_labels() == 40));
    // 誤ラベルは id % 5 == 0 の 10 件で、fold 0 以外の学習側に毎回入る
    assert_eq!(report.total, PrecisionStats::new(160, 40));
}
