//! GCN ノード分類の学習コア
//!
//! シリアライズ済みグラフを読み込み、入次数に基づく対称正規化を計算し、
//! GCN を Adam で学習する。テンソル演算と自動微分は candle に任せる。
//!
//! # 構成
//! - `dataset`: グラフコレクションの読み書き、マスク
//! - `norm`: 正規化係数
//! - `layers` / `model`: グラフ畳み込み層と GCN
//! - `optimizer`: Adam
//! - `evaluator`: 分類精度
//! - `trainer`: 学習ループ

pub mod context;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod layers;
pub mod logging;
pub mod model;
pub mod norm;
pub mod optimizer;
pub mod trainer;

pub use context::ExecutionContext;
pub use dataset::{
    DatasetKind, DatasetStatistics, GraphData, Mask, NodeDataset, load_graph_collection,
    save_graph_collection,
};
pub use error::{GcnError, GcnResult};
pub use evaluator::{accuracy, evaluate};
pub use graph::Graph;
pub use layers::{Activation, Aggregator, GcnVariant, GraphConv};
pub use logging::StructuredLogger;
pub use model::{Gcn, GcnConfig, Mode, ModeGuard, NodeClassifier};
pub use norm::{norm_tensor, symmetric_norm};
pub use optimizer::{Adam, Optimizer};
pub use trainer::{EpochStats, TrainConfig, TrainReport, TrainState, Trainer};
