//! オーケストレーションのテスト用モデル
//!
//! レコードは `{"query": {"id": n}, "assign": {"label": l}}`。
//! 推論は `id % 2` をラベルとして返すだけ。学習は呼ばれた学習率を状態に積むだけで、
//! 返す正誤はパスごとに台本 (`script`) で与える。

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gtrain_core::{GraphModel, ModelError, ModelResult, PrecisionStats};
use serde_json::{Value, json};

/// モデルの外側で共有する観測ログ（スナップショットでは巻き戻らない）
#[derive(Default)]
pub struct Probe {
    pub learn_calls: AtomicUsize,
    pub learning_rates: Mutex<Vec<f64>>,
    pub learned_ids: Mutex<Vec<u64>>,
    pub evaluated_ids: Mutex<Vec<u64>>,
}

pub struct MockModel {
    /// 値コピーされるモデル状態
    pub updates: AtomicU64,
    pub lr_sum_bits: AtomicU64,
    pub vocabulary: Vec<u64>,
    pub prepared: u32,
    pub ssvm: Option<(f64, f64)>,
    /// パスごとの (correct, incorrect)。レコード 1 件あたりの値
    script: Arc<Vec<(u64, u64)>>,
    records_per_pass: usize,
    pub probe: Arc<Probe>,
}

impl MockModel {
    pub fn new(script: Vec<(u64, u64)>, records_per_pass: usize) -> Self {
        Self {
            updates: AtomicU64::new(0),
            lr_sum_bits: AtomicU64::new(0f64.to_bits()),
            vocabulary: Vec::new(),
            prepared: 0,
            ssvm: None,
            script: Arc::new(script),
            records_per_pass,
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn lr_sum(&self) -> f64 {
        f64::from_bits(self.lr_sum_bits.load(Ordering::SeqCst))
    }

    /// 比較用の状態
    pub fn state(&self) -> (u64, u64, Vec<u64>) {
        (self.updates(), self.lr_sum_bits.load(Ordering::SeqCst), self.vocabulary.clone())
    }
}

impl Clone for MockModel {
    fn clone(&self) -> Self {
        Self {
            updates: AtomicU64::new(self.updates()),
            lr_sum_bits: AtomicU64::new(self.lr_sum_bits.load(Ordering::SeqCst)),
            vocabulary: self.vocabulary.clone(),
            prepared: self.prepared,
            ssvm: self.ssvm,
            script: Arc::clone(&self.script),
            records_per_pass: self.records_per_pass,
            probe: Arc::clone(&self.probe),
        }
    }
}

#[derive(Debug)]
pub struct MockQuery {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockAssignment {
    pub label: Option<u64>,
}

fn id_of(json: &Value) -> ModelResult<u64> {
    json["id"].as_u64().ok_or_else(|| ModelError::InvalidQuery(format!("missing id in {json}")))
}

impl GraphModel for MockModel {
    type Query = MockQuery;
    type Assignment = MockAssignment;

    fn create_query(&self, json: &Value) -> ModelResult<MockQuery> {
        Ok(MockQuery { id: id_of(json)? })
    }

    fn create_assignment(&self, _query: &MockQuery, json: &Value) -> ModelResult<MockAssignment> {
        Ok(MockAssignment {
            label: json["label"].as_u64(),
        })
    }

    fn assignment_score(&self, query: &MockQuery, assignment: &MockAssignment) -> f64 {
        if assignment.label == Some(query.id % 2) { 1.0 } else { 0.0 }
    }

    fn map_inference(&self, query: &MockQuery, assignment: &mut MockAssignment) -> ModelResult<()> {
        self.probe.evaluated_ids.lock().unwrap().push(query.id);
        assignment.label = Some(query.id % 2);
        Ok(())
    }

    fn clear_inferred(&self, assignment: &mut MockAssignment) {
        assignment.label = None;
    }

    fn compare_assignments(
        &self,
        inferred: &MockAssignment,
        reference: &MockAssignment,
    ) -> PrecisionStats {
        if inferred.label == reference.label {
            PrecisionStats::new(1, 0)
        } else {
            PrecisionStats::new(0, 1)
        }
    }

    fn ssvm_init(&mut self, regularization_const: f64, svm_margin: f64) {
        self.ssvm = Some((regularization_const, svm_margin));
    }

    fn ssvm_learn(
        &self,
        query: &MockQuery,
        _assignment: &MockAssignment,
        learning_rate: f64,
    ) -> ModelResult<PrecisionStats> {
        let call = self.probe.learn_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.learning_rates.lock().unwrap().push(learning_rate);
        self.probe.learned_ids.lock().unwrap().push(query.id);
        self.updates.fetch_add(1, Ordering::SeqCst);
        let _ = self.lr_sum_bits.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
            Some((f64::from_bits(bits) + learning_rate).to_bits())
        });
        let pass = call / self.records_per_pass.max(1);
        let (c, i) = self.script.get(pass).copied().unwrap_or((1, 0));
        Ok(PrecisionStats::new(c, i))
    }

    fn add_query_to_model(&mut self, query: &Value, _assignment: &Value) -> ModelResult<()> {
        self.vocabulary.push(id_of(query)?);
        Ok(())
    }

    fn prepare_for_inference(&mut self) {
        self.prepared += 1;
    }

    fn load_model(prefix: &Path) -> ModelResult<Self> {
        let path = model_path(prefix);
        let text = std::fs::read_to_string(&path).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        let v: Value =
            serde_json::from_str(&text).map_err(|source| ModelError::Format { path, source })?;
        let mut model = MockModel::new(Vec::new(), 1);
        model.updates = AtomicU64::new(v["updates"].as_u64().unwrap_or(0));
        Ok(model)
    }

    fn save_model(&self, prefix: &Path) -> ModelResult<()> {
        let path = model_path(prefix);
        std::fs::write(&path, json!({ "updates": self.updates() }).to_string())
            .map_err(|source| ModelError::Io { path, source })
    }
}

fn model_path(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(".mock.json");
    PathBuf::from(s)
}

/// `n` 件のレコード行。ラベルは `id % 2`（= 推論結果）だが `wrong` 番目ごとに反転する
pub fn record_lines(n: usize, wrong_every: Option<usize>) -> Vec<String> {
    (0..n)
        .map(|i| {
            let mut label = i % 2;
            if wrong_every.is_some_and(|k| i % k == 0) {
                label ^= 1;
            }
            json!({ "query": { "id": i }, "assign": { "label": label } }).to_string()
        })
        .collect()
}

pub fn write_records(dir: &tempfile::TempDir, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}
