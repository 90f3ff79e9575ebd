//! `train_gcn` の引数定義

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use gcn_core::{Activation, DatasetKind, GcnVariant, TrainConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DatasetArg {
    Amazon2m,
}

impl From<DatasetArg> for DatasetKind {
    fn from(arg: DatasetArg) -> Self {
        match arg {
            DatasetArg::Amazon2m => DatasetKind::Amazon2M,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    GraphConv,
    MessagePassing,
    EdgeWeighted,
}

impl From<VariantArg> for GcnVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::GraphConv => GcnVariant::GraphConv,
            VariantArg::MessagePassing => GcnVariant::MessagePassing,
            VariantArg::EdgeWeighted => GcnVariant::EdgeWeighted,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ActivationArg {
    Relu,
    Elu,
    Tanh,
}

impl From<ActivationArg> for Activation {
    fn from(arg: ActivationArg) -> Self {
        match arg {
            ActivationArg::Relu => Activation::Relu,
            ActivationArg::Elu => Activation::Elu,
            ActivationArg::Tanh => Activation::Tanh,
        }
    }
}

/// GCN によるノード分類の学習
#[derive(Parser, Debug, Clone)]
#[command(name = "train_gcn", about = "GCN ノード分類の学習")]
pub struct TrainArgs {
    /// データセット名
    #[arg(long, value_enum, default_value_t = DatasetArg::Amazon2m)]
    pub dataset: DatasetArg,

    /// データセットファイル（省略時はデータセットごとの既定パス）
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// dropout 確率
    #[arg(long, default_value_t = 0.5)]
    pub dropout: f32,

    /// GPU 番号（負数で CPU）
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub gpu: i32,

    /// 学習率
    #[arg(long, default_value_t = 1e-2)]
    pub lr: f64,

    /// エポック数
    #[arg(long, default_value_t = 200)]
    pub n_epochs: usize,

    /// 隠れ層の次元
    #[arg(long, default_value_t = 64)]
    pub n_hidden: usize,

    /// 隠れ層の数
    #[arg(long, default_value_t = 1)]
    pub n_layers: usize,

    /// L2 正則化の係数
    #[arg(long, default_value_t = 5e-4)]
    pub weight_decay: f64,

    /// 互換性のためのフラグ（グラフは変更しない）
    #[arg(long)]
    pub self_loop: bool,

    /// 集約の実行方式
    #[arg(long, value_enum, default_value_t = VariantArg::GraphConv)]
    pub variant: VariantArg,

    /// 隠れ層の活性化関数
    #[arg(long, value_enum, default_value_t = ActivationArg::Relu)]
    pub activation: ActivationArg,

    /// 乱数シード（初期化と dropout）
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// 構造化ログ（JSONL）の出力先。`-` で stdout
    #[arg(long)]
    pub structured_log: Option<String>,

    /// 学習後のパラメータを safetensors で保存する
    #[arg(long)]
    pub save_model: Option<PathBuf>,
}

impl TrainArgs {
    pub fn dataset_kind(&self) -> DatasetKind {
        self.dataset.into()
    }

    pub fn data_path(&self) -> PathBuf {
        self.data_path.clone().unwrap_or_else(|| self.dataset_kind().default_path())
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            n_epochs: self.n_epochs,
            lr: self.lr,
            weight_decay: self.weight_decay,
            n_hidden: self.n_hidden,
            n_layers: self.n_layers,
            dropout: self.dropout,
            activation: self.activation.into(),
            variant: self.variant.into(),
        }
    }
}
