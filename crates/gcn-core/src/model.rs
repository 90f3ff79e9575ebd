//! GCN モデル
//!
//! `NodeClassifier` は学習ループから見たモデルの境界。`Gcn` はその唯一の実装で、
//! 集約方式は `GcnVariant` で切り替える。

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use candle_core::{Tensor, Var};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::context::{ExecutionContext, STREAM_DROPOUT, STREAM_INIT};
use crate::error::{GcnError, GcnResult};
use crate::graph::Graph;
use crate::layers::{Activation, Aggregator, GcnVariant, GraphConv};

/// 学習モード / 推論モード
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// dropout を適用し、勾配計算用のグラフを構築する
    Train,
    /// dropout なし、パラメータを切り離して計算する
    Eval,
}

/// ノードごとのクラスロジットを出すモデル
pub trait NodeClassifier {
    /// 全ノードのロジット `[N, classes]` を計算する
    fn forward(&mut self, features: &Tensor) -> GcnResult<Tensor>;

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    /// オプティマイザに渡す学習可能パラメータ
    fn vars(&self) -> Vec<Var>;

    /// 推論モードに入り、ガードが破棄されたときに元のモードへ戻す
    fn eval_scope(&mut self) -> ModeGuard<'_, Self> {
        ModeGuard::enter(self, Mode::Eval)
    }
}

/// モード切り替えのスコープガード
pub struct ModeGuard<'a, M: NodeClassifier + ?Sized> {
    model: &'a mut M,
    previous: Mode,
}

impl<'a, M: NodeClassifier + ?Sized> ModeGuard<'a, M> {
    pub fn enter(model: &'a mut M, mode: Mode) -> Self {
        let previous = model.mode();
        model.set_mode(mode);
        Self { model, previous }
    }
}

impl<M: NodeClassifier + ?Sized> Deref for ModeGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: NodeClassifier + ?Sized> DerefMut for ModeGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

impl<M: NodeClassifier + ?Sized> Drop for ModeGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_mode(self.previous);
    }
}

/// モデル構成
#[derive(Clone, Debug, Serialize)]
pub struct GcnConfig {
    pub in_feats: usize,
    pub n_hidden: usize,
    pub n_classes: usize,
    /// 隠れ層の数（入力層・出力層を除く層数 + 1）
    pub n_layers: usize,
    pub activation: Activation,
    pub dropout: f32,
    pub variant: GcnVariant,
}

impl GcnConfig {
    pub fn validate(&self) -> GcnResult<()> {
        if self.in_feats == 0 {
            return Err(GcnError::config("input feature dimension must be > 0"));
        }
        if self.n_classes < 2 {
            return Err(GcnError::config("at least two classes are required"));
        }
        check_layer_shape(self.n_hidden, self.n_layers, self.dropout)
    }
}

/// 隠れ層の次元・層数・dropout 確率の検証
pub(crate) fn check_layer_shape(n_hidden: usize, n_layers: usize, dropout: f32) -> GcnResult<()> {
    if n_hidden == 0 {
        return Err(GcnError::config("--n-hidden must be > 0"));
    }
    if n_layers == 0 {
        return Err(GcnError::config("--n-layers must be >= 1"));
    }
    if !(0.0..1.0).contains(&dropout) {
        return Err(GcnError::config(format!("--dropout must be in [0, 1), got {dropout}")));
    }
    Ok(())
}

/// グラフ畳み込みネットワーク
///
/// 入力層 `in → hidden`、隠れ層 `hidden → hidden` を `n_layers - 1` 枚、
/// 出力層 `hidden → classes`（活性化なし）。2 層目以降の入力に dropout をかける。
pub struct Gcn {
    layers: Vec<GraphConv>,
    aggregator: Aggregator,
    dropout: f32,
    mode: Mode,
    rng: ChaCha8Rng,
}

impl Gcn {
    pub fn new(
        graph: &Graph,
        norm: Tensor,
        config: &GcnConfig,
        ctx: &ExecutionContext,
    ) -> GcnResult<Self> {
        config.validate()?;
        let mut init_rng = ctx.rng(STREAM_INIT);
        let device = ctx.device();
        let act = Some(config.activation);

        let mut layers = Vec::with_capacity(config.n_layers + 1);
        layers.push(GraphConv::new(config.in_feats, config.n_hidden, act, &mut init_rng, device)?);
        for _ in 1..config.n_layers {
            layers.push(GraphConv::new(
                config.n_hidden,
                config.n_hidden,
                act,
                &mut init_rng,
                device,
            )?);
        }
        layers.push(GraphConv::new(
            config.n_hidden,
            config.n_classes,
            None,
            &mut init_rng,
            device,
        )?);

        Ok(Self {
            layers,
            aggregator: Aggregator::new(graph, norm, config.variant)?,
            dropout: config.dropout,
            mode: Mode::Train,
            rng: ctx.rng(STREAM_DROPOUT),
        })
    }

    pub fn layers(&self) -> &[GraphConv] {
        &self.layers
    }

    pub fn variant(&self) -> GcnVariant {
        self.aggregator.variant()
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(GraphConv::param_count).sum()
    }

    /// パラメータを safetensors 形式で保存する
    pub fn save_parameters<P: AsRef<Path>>(&self, path: P) -> GcnResult<()> {
        let mut tensors = HashMap::new();
        for (i, layer) in self.layers.iter().enumerate() {
            tensors.insert(format!("layers.{i}.weight"), layer.weight.as_tensor().clone());
            tensors.insert(format!("layers.{i}.bias"), layer.bias.as_tensor().clone());
        }
        candle_core::safetensors::save(&tensors, path.as_ref())?;
        Ok(())
    }
}

/// 逆 dropout: 確率 `p` で 0、それ以外は `1 / (1 - p)` 倍
///
/// マスクはシード付き `ChaCha8Rng` からホスト側で作る。`--seed` が同じなら実行結果も同じになる。
/// 代わりに要素数分のホストバッファ（N×hidden×4 バイト）と、CUDA 使用時はその転送が
/// 層ごと・エポックごとに発生する。
fn dropout<R: Rng>(h: &Tensor, p: f32, rng: &mut R) -> candle_core::Result<Tensor> {
    let scale = 1.0 / (1.0 - p);
    let mask: Vec<f32> = (0..h.elem_count())
        .map(|_| if rng.random::<f32>() < p { 0.0 } else { scale })
        .collect();
    let mask = Tensor::from_vec(mask, h.dims().to_vec(), h.device())?;
    h.mul(&mask)
}

impl NodeClassifier for Gcn {
    fn forward(&mut self, features: &Tensor) -> GcnResult<Tensor> {
        let train = self.mode == Mode::Train;
        let mut h = features.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            if i != 0 && train && self.dropout > 0.0 {
                h = dropout(&h, self.dropout, &mut self.rng)?;
            }
            h = layer.forward(&self.aggregator, &h, train)?;
        }
        Ok(h)
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn vars(&self) -> Vec<Var> {
        self.layers
            .iter()
            .flat_map(|l| [l.weight.clone(), l.bias.clone()])
            .collect()
    }
}

impl fmt::Display for Gcn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GCN(")?;
        writeln!(f, "  (variant): {}", self.variant().name())?;
        writeln!(f, "  (layers):")?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(f, "    ({i}): {layer}")?;
        }
        writeln!(f, "  (dropout): p={}", self.dropout)?;
        write!(f, ")")
    }
}
