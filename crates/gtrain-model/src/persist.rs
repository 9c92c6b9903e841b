//! モデルファイルの保存・読み込み
//!
//! `<prefix>.model.json` に JSON で書く。prefix が `.gz` で終わる場合は
//! `.gz` を取り除いた上で `<stem>.model.json.gz` に gzip で書く。

use std::path::{Path, PathBuf};

use gtrain_core::io::{open_reader, open_writer};
use gtrain_core::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

use crate::graph::Vocab;
use crate::pairwise::PairwiseModel;
use crate::weights::Weights;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FeatureEntry {
    relation: u32,
    a: u32,
    b: u32,
    weight: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    version: u32,
    labels: Vec<String>,
    relations: Vec<String>,
    features: Vec<FeatureEntry>,
    regularization_const: f64,
    svm_margin: f64,
}

/// prefix からモデルファイルのパスを作る
pub fn model_path(prefix: &Path) -> PathBuf {
    let s = prefix.to_string_lossy();
    match s.strip_suffix(".gz") {
        Some(stem) => PathBuf::from(format!("{stem}.model.json.gz")),
        None => PathBuf::from(format!("{s}.model.json")),
    }
}

fn format_error(path: &Path, msg: String) -> ModelError {
    let source = <serde_json::Error as serde::de::Error>::custom(msg);
    ModelError::Format {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn save(model: &PairwiseModel, prefix: &Path) -> ModelResult<()> {
    let path = model_path(prefix);
    let weights = model.weights.to_vec();
    let file = ModelFile {
        version: FORMAT_VERSION,
        labels: model.labels.names().to_vec(),
        relations: model.relations.names().to_vec(),
        features: model
            .feature_keys
            .iter()
            .zip(weights)
            .map(|(&(relation, a, b), weight)| FeatureEntry {
                relation,
                a,
                b,
                weight,
            })
            .collect(),
        regularization_const: model.regularization_const,
        svm_margin: model.svm_margin,
    };

    let io_err = |source| ModelError::Io {
        path: path.clone(),
        source,
    };
    let mut w = open_writer(&path).map_err(io_err)?;
    serde_json::to_writer(&mut w, &file)
        .map_err(|source| ModelError::Format {
            path: path.clone(),
            source,
        })?;
    w.close().map_err(io_err)?;
    log::info!("Saved model with {} features to {}", file.features.len(), path.display());
    Ok(())
}

pub(crate) fn load(prefix: &Path) -> ModelResult<PairwiseModel> {
    let path = model_path(prefix);
    let reader = open_reader(&path).map_err(|source| ModelError::Io {
        path: path.clone(),
        source,
    })?;
    let file: ModelFile = serde_json::from_reader(reader)
        .map_err(|source| ModelError::Format {
            path: path.clone(),
            source,
        })?;
    if file.version != FORMAT_VERSION {
        let msg = format!("unsupported model format version {}", file.version);
        return Err(format_error(&path, msg));
    }

    let num_labels = file.labels.len();
    let num_relations = file.relations.len();
    let mut keys = Vec::with_capacity(file.features.len());
    let mut weights = Vec::with_capacity(file.features.len());
    for f in &file.features {
        let in_range = (f.relation as usize) < num_relations
            && (f.a as usize) < num_labels
            && (f.b as usize) < num_labels;
        if !in_range {
            let msg = format!(
                "feature ({}, {}, {}) refers to an unknown label or relation",
                f.relation, f.a, f.b
            );
            return Err(format_error(&path, msg));
        }
        keys.push((f.relation, f.a, f.b));
        weights.push(f.weight);
    }

    log::info!("Loaded model with {} features from {}", keys.len(), path.display());
    Ok(PairwiseModel::from_parts(
        Vocab::from_names(file.labels),
        Vocab::from_names(file.relations),
        keys,
        Weights::from_vec(weights),
        file.regularization_const,
        file.svm_margin,
    ))
}
