//! ペアワイズ因子グラフモデル
//!
//! 特徴量は `(関係, 端 a のラベル, 端 b のラベル)` の三つ組で、モデル構築パスで
//! 学習データに現れたものだけを登録する。推論は ICM（iterated conditional modes）、
//! 学習は loss-augmented 推論による SSVM の劣勾配更新。

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use gtrain_core::{GraphModel, ModelError, ModelResult, PrecisionStats};
use serde_json::Value;

use crate::graph::{PairwiseAssignment, PairwiseQuery, Vocab, parse_factors, parse_labels};
use crate::persist;
use crate::weights::Weights;

/// ICM の最大スイープ数
const MAX_SWEEPS: usize = 8;

/// L2 正則化の縮小率にかかる係数
const L2_SCALE: f64 = 1e-3;

pub(crate) type FeatureKey = (u32, u32, u32);

/// 候補表で、推論する変数が因子のどちらの端にいるか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    A,
    B,
}

/// loss-augmented 推論の設定
struct Loss<'a> {
    gold: &'a [Option<u32>],
    margin: f64,
}

/// ペアワイズ因子グラフモデル
#[derive(Debug, Clone, Default)]
pub struct PairwiseModel {
    pub(crate) labels: Vocab,
    pub(crate) relations: Vocab,
    pub(crate) feature_keys: Vec<FeatureKey>,
    features: HashMap<FeatureKey, usize>,
    pub(crate) weights: Weights,
    /// `(関係, 隣の変数のラベル, 自分の端)` → 候補ラベル（昇順）
    candidates: HashMap<(u32, u32, Side), Vec<u32>>,
    pub(crate) regularization_const: f64,
    pub(crate) svm_margin: f64,
}

impl PairwiseModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_features(&self) -> usize {
        self.feature_keys.len()
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn label_name(&self, id: u32) -> Option<&str> {
        self.labels.names().get(id as usize).map(String::as_str)
    }

    /// `(関係名, ラベル a, ラベル b)` の重み。未登録なら `None`
    pub fn weight(&self, relation: &str, label_a: &str, label_b: &str) -> Option<f64> {
        let key =
            (self.relations.get(relation)?, self.labels.get(label_a)?, self.labels.get(label_b)?);
        self.features.get(&key).map(|&i| self.weights.get(i))
    }

    /// 永続化したモデルから復元する
    pub(crate) fn from_parts(
        labels: Vocab,
        relations: Vocab,
        feature_keys: Vec<FeatureKey>,
        weights: Weights,
        regularization_const: f64,
        svm_margin: f64,
    ) -> Self {
        let features = feature_keys.iter().enumerate().map(|(i, &k)| (k, i)).collect();
        let mut model = Self {
            labels,
            relations,
            feature_keys,
            features,
            weights,
            candidates: HashMap::new(),
            regularization_const,
            svm_margin,
        };
        model.prepare_for_inference();
        model
    }

    fn feature_index(
        &self,
        relation: Option<u32>,
        la: Option<u32>,
        lb: Option<u32>,
    ) -> Option<usize> {
        self.features.get(&(relation?, la?, lb?)).copied()
    }

    fn feature_weight(&self, relation: Option<u32>, la: Option<u32>, lb: Option<u32>) -> f64 {
        self.feature_index(relation, la, lb).map_or(0.0, |i| self.weights.get(i))
    }

    /// 変数 `pos` のラベルを `label` にしたときの、接続因子のスコア和
    fn local_score(
        &self,
        query: &PairwiseQuery,
        labels: &[Option<u32>],
        pos: usize,
        label: Option<u32>,
        loss: Option<&Loss<'_>>,
    ) -> f64 {
        let mut score = 0.0;
        for &fi in &query.adjacency[pos] {
            let f = &query.factors[fi];
            let la = if f.a == pos { label } else { labels[f.a] };
            let lb = if f.b == pos { label } else { labels[f.b] };
            score += self.feature_weight(f.relation, la, lb);
        }
        if let Some(loss) = loss {
            if label.is_some() && loss.gold[pos] == label {
                score -= loss.margin;
            }
        }
        score
    }

    fn candidates_for(
        &self,
        query: &PairwiseQuery,
        labels: &[Option<u32>],
        pos: usize,
    ) -> BTreeSet<u32> {
        let mut out = BTreeSet::new();
        for &fi in &query.adjacency[pos] {
            let f = &query.factors[fi];
            let Some(rel) = f.relation else {
                continue;
            };
            if f.a == f.b {
                continue;
            }
            let (neighbour, side) = if f.a == pos { (f.b, Side::A) } else { (f.a, Side::B) };
            if let Some(nl) = labels[neighbour] {
                if let Some(c) = self.candidates.get(&(rel, nl, side)) {
                    out.extend(c.iter().copied());
                }
            }
        }
        out
    }

    /// 推論対象の変数を 1 つずつ局所最適なラベルへ置き換え、変化がなくなるまで繰り返す
    fn icm(
        &self,
        query: &PairwiseQuery,
        assignment: &mut PairwiseAssignment,
        loss: Option<&Loss<'_>>,
    ) {
        for _ in 0..MAX_SWEEPS {
            let mut changed = false;
            for pos in 0..query.num_vars() {
                if !assignment.inferred[pos] {
                    continue;
                }
                let current = assignment.labels[pos];
                let mut best = current;
                // ラベルのない状態よりは、どの候補でも良い
                let mut best_score = if current.is_some() {
                    self.local_score(query, &assignment.labels, pos, current, loss)
                } else {
                    f64::NEG_INFINITY
                };
                for cand in self.candidates_for(query, &assignment.labels, pos) {
                    if Some(cand) == current {
                        continue;
                    }
                    let s = self.local_score(query, &assignment.labels, pos, Some(cand), loss);
                    if s > best_score {
                        best = Some(cand);
                        best_score = s;
                    }
                }
                if best != current {
                    assignment.labels[pos] = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

impl GraphModel for PairwiseModel {
    type Query = PairwiseQuery;
    type Assignment = PairwiseAssignment;

    fn create_query(&self, json: &Value) -> ModelResult<PairwiseQuery> {
        Ok(PairwiseQuery::build(&parse_factors(json)?, &self.relations))
    }

    fn create_assignment(
        &self,
        query: &PairwiseQuery,
        json: &Value,
    ) -> ModelResult<PairwiseAssignment> {
        PairwiseAssignment::build(query, &parse_labels(json)?, &self.labels)
    }

    fn assignment_score(&self, query: &PairwiseQuery, assignment: &PairwiseAssignment) -> f64 {
        query
            .factors
            .iter()
            .map(|f| {
                self.feature_weight(f.relation, assignment.labels[f.a], assignment.labels[f.b])
            })
            .sum()
    }

    fn map_inference(
        &self,
        query: &PairwiseQuery,
        assignment: &mut PairwiseAssignment,
    ) -> ModelResult<()> {
        self.icm(query, assignment, None);
        Ok(())
    }

    fn clear_inferred(&self, assignment: &mut PairwiseAssignment) {
        for (label, &inferred) in assignment.labels.iter_mut().zip(&assignment.inferred) {
            if inferred {
                *label = None;
            }
        }
    }

    fn compare_assignments(
        &self,
        inferred: &PairwiseAssignment,
        reference: &PairwiseAssignment,
    ) -> PrecisionStats {
        let mut stats = PrecisionStats::default();
        for (pos, &is_inferred) in reference.inferred.iter().enumerate() {
            if !is_inferred {
                continue;
            }
            let gold = reference.labels[pos];
            if gold.is_some() && inferred.labels.get(pos).copied().flatten() == gold {
                stats.correct_labels += 1;
            } else {
                stats.incorrect_labels += 1;
            }
        }
        stats
    }

    fn ssvm_init(&mut self, regularization_const: f64, svm_margin: f64) {
        self.regularization_const = regularization_const;
        self.svm_margin = svm_margin;
    }

    fn ssvm_learn(
        &self,
        query: &PairwiseQuery,
        assignment: &PairwiseAssignment,
        learning_rate: f64,
    ) -> ModelResult<PrecisionStats> {
        let mut predicted = assignment.clone();
        self.clear_inferred(&mut predicted);
        let loss = Loss {
            gold: &assignment.labels,
            margin: self.svm_margin,
        };
        self.icm(query, &mut predicted, Some(&loss));

        let stats = self.compare_assignments(&predicted, assignment);
        if stats.incorrect_labels == 0 {
            return Ok(stats);
        }

        let shrink = 1.0 - learning_rate * self.regularization_const * L2_SCALE;
        for f in &query.factors {
            let gold = (assignment.labels[f.a], assignment.labels[f.b]);
            let pred = (predicted.labels[f.a], predicted.labels[f.b]);
            if gold == pred {
                continue;
            }
            if let Some(i) = self.feature_index(f.relation, gold.0, gold.1) {
                self.weights.add(i, learning_rate);
                self.weights.scale(i, shrink);
            }
            if let Some(i) = self.feature_index(f.relation, pred.0, pred.1) {
                self.weights.add(i, -learning_rate);
                self.weights.scale(i, shrink);
            }
        }
        Ok(stats)
    }

    fn add_query_to_model(&mut self, query: &Value, assignment: &Value) -> ModelResult<()> {
        let factors = parse_factors(query)?;
        let labels = parse_labels(assignment)?;

        let mut var_labels: HashMap<i64, Option<u32>> = HashMap::new();
        for f in &factors {
            var_labels.insert(f.a, None);
            var_labels.insert(f.b, None);
        }
        for l in &labels {
            let slot = var_labels.get_mut(&l.var).ok_or(ModelError::UnknownVariable(l.var))?;
            *slot = Some(self.labels.intern(&l.label));
        }

        for f in &factors {
            let relation = self.relations.intern(&f.relation);
            if let (Some(la), Some(lb)) = (var_labels[&f.a], var_labels[&f.b]) {
                let key = (relation, la, lb);
                if !self.features.contains_key(&key) {
                    let index = self.weights.push(0.0);
                    self.features.insert(key, index);
                    self.feature_keys.push(key);
                }
            }
        }
        Ok(())
    }

    fn prepare_for_inference(&mut self) {
        let mut candidates: HashMap<(u32, u32, Side), Vec<u32>> = HashMap::new();
        for &(rel, la, lb) in &self.feature_keys {
            candidates.entry((rel, lb, Side::A)).or_default().push(la);
            candidates.entry((rel, la, Side::B)).or_default().push(lb);
        }
        for list in candidates.values_mut() {
            list.sort_unstable();
            list.dedup();
        }
        log::debug!(
            "Prepared inference index: {} labels, {} relations, {} features, {} candidate lists",
            self.labels.len(),
            self.relations.len(),
            self.feature_keys.len(),
            candidates.len()
        );
        self.candidates = candidates;
    }

    fn load_model(prefix: &Path) -> ModelResult<Self> {
        persist::load(prefix)
    }

    fn save_model(&self, prefix: &Path) -> ModelResult<()> {
        persist::save(self, prefix)
    }
}
