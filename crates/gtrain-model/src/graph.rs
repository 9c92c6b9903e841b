//! クエリ・割り当ての JSON 表現と、モデル内部での表現
//!
//! クエリは因子の配列 `[{"a": 1, "b": 2, "f2": "rel"}, ...]`、
//! 割り当ては `[{"v": 1, "inf": "label"}, {"v": 2, "giv": "label"}, ...]`。
//! どちらも `null` は空として扱う。

use std::collections::HashMap;

use gtrain_core::{ModelError, ModelResult};
use serde_json::Value;

/// 文字列 ⇔ 連番 ID の対応表
#[derive(Debug, Clone, Default)]
pub struct Vocab {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl Vocab {
    pub fn from_names(names: Vec<String>) -> Self {
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i as u32)).collect();
        Self { names, index }
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// ラベル・関係名として使う JSON 値のキー表現（文字列はそのまま、数値・真偽値は JSON 表記）
fn scalar_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(_) | Value::Bool(_) => Some(v.to_string()),
        _ => None,
    }
}

/// JSON から読んだままの因子
#[derive(Debug, Clone, PartialEq)]
pub struct RawFactor {
    pub a: i64,
    pub b: i64,
    pub relation: String,
}

/// JSON から読んだままのラベル割り当て
#[derive(Debug, Clone, PartialEq)]
pub struct RawLabel {
    pub var: i64,
    pub label: String,
    pub inferred: bool,
}

/// 因子の配列を読む。形の合わない要素は無視する。
pub fn parse_factors(json: &Value) -> ModelResult<Vec<RawFactor>> {
    let items = match json {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ModelError::InvalidQuery(format!(
                "expected an array of factors, got {other}"
            )));
        }
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            Some(RawFactor {
                a: item.get("a")?.as_i64()?,
                b: item.get("b")?.as_i64()?,
                relation: scalar_key(item.get("f2")?)?,
            })
        })
        .collect())
}

/// ラベル割り当ての配列を読む。要素はすべて `v` と `inf` / `giv` のどちらかを持つこと。
pub fn parse_labels(json: &Value) -> ModelResult<Vec<RawLabel>> {
    let items = match json {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ModelError::InvalidAssignment(format!(
                "expected an array of labels, got {other}"
            )));
        }
    };
    let invalid =
        |msg: &str, item: &Value| ModelError::InvalidAssignment(format!("{msg} in {item}"));
    items
        .iter()
        .map(|item| {
            let var = item
                .get("v")
                .and_then(Value::as_i64)
                .ok_or_else(|| invalid("missing integer \"v\"", item))?;
            let (label, inferred) = match (item.get("inf"), item.get("giv")) {
                (Some(l), _) => (l, true),
                (None, Some(l)) => (l, false),
                (None, None) => return Err(invalid("missing \"inf\" or \"giv\"", item)),
            };
            let label = scalar_key(label).ok_or_else(|| invalid("label must be a scalar", item))?;
            Ok(RawLabel {
                var,
                label,
                inferred,
            })
        })
        .collect()
}

/// 変数の添字で表した因子。未知の関係は `None`（特徴量を持たない）
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub a: usize,
    pub b: usize,
    pub relation: Option<u32>,
}

/// 推論対象のグラフ
#[derive(Debug, Clone, Default)]
pub struct PairwiseQuery {
    pub(crate) vars: Vec<i64>,
    var_index: HashMap<i64, usize>,
    pub(crate) factors: Vec<Factor>,
    /// 変数ごとの接続因子
    pub(crate) adjacency: Vec<Vec<usize>>,
}

impl PairwiseQuery {
    pub fn build(raw: &[RawFactor], relations: &Vocab) -> Self {
        let mut query = Self::default();
        for f in raw {
            let a = query.var_slot(f.a);
            let b = query.var_slot(f.b);
            query.adjacency[a].push(query.factors.len());
            if b != a {
                query.adjacency[b].push(query.factors.len());
            }
            query.factors.push(Factor {
                a,
                b,
                relation: relations.get(&f.relation),
            });
        }
        query
    }

    fn var_slot(&mut self, var: i64) -> usize {
        if let Some(&i) = self.var_index.get(&var) {
            return i;
        }
        let i = self.vars.len();
        self.vars.push(var);
        self.var_index.insert(var, i);
        self.adjacency.push(Vec::new());
        i
    }

    pub fn var_position(&self, var: i64) -> Option<usize> {
        self.var_index.get(&var).copied()
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }
}

/// クエリの各変数へのラベル
///
/// 未知のラベルは `None`。割り当てのない変数も `None` で、推論対象にはならない。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PairwiseAssignment {
    pub(crate) labels: Vec<Option<u32>>,
    pub(crate) inferred: Vec<bool>,
}

impl PairwiseAssignment {
    pub fn build(query: &PairwiseQuery, raw: &[RawLabel], labels: &Vocab) -> ModelResult<Self> {
        let n = query.num_vars();
        let mut assignment = Self {
            labels: vec![None; n],
            inferred: vec![false; n],
        };
        for l in raw {
            let pos = query.var_position(l.var).ok_or(ModelError::UnknownVariable(l.var))?;
            assignment.labels[pos] = labels.get(&l.label);
            assignment.inferred[pos] = l.inferred;
        }
        Ok(assignment)
    }

    pub fn label(&self, pos: usize) -> Option<u32> {
        self.labels[pos]
    }

    pub fn is_inferred(&self, pos: usize) -> bool {
        self.inferred[pos]
    }

    pub fn num_inferred(&self) -> usize {
        self.inferred.iter().filter(|&&b| b).count()
    }
}
