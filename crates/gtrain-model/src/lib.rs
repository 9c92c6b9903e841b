//! gtrain-model: ペアワイズ因子グラフの参照モデル
//!
//! [`gtrain_core::GraphModel`] の実装。変数間の関係ごとにラベル対の重みを持ち、
//! ICM で MAP 推論し、Hogwild で SSVM 学習する。

pub mod graph;
pub mod pairwise;
pub mod persist;
pub mod weights;

pub use graph::{PairwiseAssignment, PairwiseQuery};
pub use pairwise::PairwiseModel;
pub use persist::model_path;
