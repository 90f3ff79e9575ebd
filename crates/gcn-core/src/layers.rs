//! グラフ畳み込み層
//!
//! 1 層あたり `act(norm ⊙ Σ_{u→v} (norm ⊙ h)[u] · W + b)` を計算する。
//! 近傍集約は candle の `index_select`（gather）と `index_add`（scatter-sum）で表現し、
//! 勾配は candle の自動微分に任せる。

use std::fmt;

use candle_core::{Tensor, Var};
use rand::Rng;
use serde::Serialize;

use crate::error::GcnResult;
use crate::graph::Graph;

/// 隠れ層の活性化関数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activation {
    Relu,
    Elu,
    Tanh,
}

impl Activation {
    pub fn apply(self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::Relu => xs.relu(),
            Activation::Elu => xs.elu(1.0),
            Activation::Tanh => xs.tanh(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Elu => "elu",
            Activation::Tanh => "tanh",
        }
    }
}

/// 集約の実行方式（いずれも数値的に同じ結果になる）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GcnVariant {
    /// 入力次元が出力次元より大きければ先に射影し、そうでなければ先に集約する
    GraphConv,
    /// ノード特徴を正規化してから辺ごとのメッセージを集約し、最後に射影する
    MessagePassing,
    /// 辺重み `norm[src]·norm[dst]` を前計算し、射影後の特徴を重み付きで集約する
    EdgeWeighted,
}

impl GcnVariant {
    pub fn name(self) -> &'static str {
        match self {
            GcnVariant::GraphConv => "graph-conv",
            GcnVariant::MessagePassing => "message-passing",
            GcnVariant::EdgeWeighted => "edge-weighted",
        }
    }
}

/// 近傍集約に必要なグラフ側のテンソル
#[derive(Clone, Debug)]
pub struct Aggregator {
    variant: GcnVariant,
    num_nodes: usize,
    src: Tensor,
    dst: Tensor,
    /// `[N, 1]`
    norm: Tensor,
    /// `[E, 1]`（EdgeWeighted のみ）
    edge_weight: Option<Tensor>,
}

impl Aggregator {
    pub fn new(graph: &Graph, norm: Tensor, variant: GcnVariant) -> GcnResult<Self> {
        let src = graph.src_index().clone();
        let dst = graph.dst_index().clone();
        let edge_weight = match variant {
            GcnVariant::EdgeWeighted => {
                Some(norm.index_select(&src, 0)?.mul(&norm.index_select(&dst, 0)?)?)
            }
            GcnVariant::GraphConv | GcnVariant::MessagePassing => None,
        };
        Ok(Self {
            variant,
            num_nodes: graph.num_nodes(),
            src,
            dst,
            norm,
            edge_weight,
        })
    }

    pub fn variant(&self) -> GcnVariant {
        self.variant
    }

    /// 辺ごとのメッセージを終点ノードへ足し込む
    fn scatter_sum(&self, messages: &Tensor) -> candle_core::Result<Tensor> {
        let feat = messages.dim(1)?;
        let out = Tensor::zeros((self.num_nodes, feat), messages.dtype(), messages.device())?;
        out.index_add(&self.dst, messages, 0)
    }

    /// `norm ⊙ Σ_{u→v} (norm ⊙ h)[u]`
    pub fn aggregate(&self, h: &Tensor) -> candle_core::Result<Tensor> {
        match &self.edge_weight {
            Some(w) => {
                let messages = h.index_select(&self.src, 0)?.broadcast_mul(w)?;
                self.scatter_sum(&messages)
            }
            None => {
                let scaled = h.broadcast_mul(&self.norm)?;
                let messages = scaled.index_select(&self.src, 0)?;
                self.scatter_sum(&messages)?.broadcast_mul(&self.norm)
            }
        }
    }

    /// 集約と線形射影 `Â h W` を方式に応じた順序で行う
    fn propagate(&self, h: &Tensor, weight: &Tensor) -> candle_core::Result<Tensor> {
        match self.variant {
            GcnVariant::GraphConv => {
                let (in_feats, out_feats) = weight.dims2()?;
                if in_feats > out_feats {
                    self.aggregate(&h.matmul(weight)?)
                } else {
                    self.aggregate(h)?.matmul(weight)
                }
            }
            GcnVariant::MessagePassing => self.aggregate(h)?.matmul(weight),
            GcnVariant::EdgeWeighted => self.aggregate(&h.matmul(weight)?),
        }
    }
}

/// 学習可能なグラフ畳み込み層
pub struct GraphConv {
    /// 重み `[in, out]`
    pub weight: Var,
    /// バイアス `[out]`
    pub bias: Var,
    activation: Option<Activation>,
}

impl GraphConv {
    /// Glorot 一様分布で重みを、ゼロでバイアスを初期化する
    pub fn new<R: Rng>(
        in_feats: usize,
        out_feats: usize,
        activation: Option<Activation>,
        rng: &mut R,
        device: &candle_core::Device,
    ) -> GcnResult<Self> {
        let bound = (6.0 / (in_feats + out_feats) as f32).sqrt();
        let weights: Vec<f32> = (0..in_feats * out_feats)
            .map(|_| rng.random::<f32>() * 2.0 * bound - bound)
            .collect();
        let weight = Var::from_tensor(&Tensor::from_vec(weights, (in_feats, out_feats), device)?)?;
        let bias = Var::zeros(out_feats, candle_core::DType::F32, device)?;
        Ok(Self {
            weight,
            bias,
            activation,
        })
    }

    pub fn in_feats(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn out_feats(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn activation(&self) -> Option<Activation> {
        self.activation
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.weight.elem_count() + self.bias.elem_count()
    }

    /// 順伝播
    ///
    /// `track_grad` が偽のときは切り離したパラメータを使い、計算グラフを作らない。
    pub fn forward(
        &self,
        aggregator: &Aggregator,
        h: &Tensor,
        track_grad: bool,
    ) -> candle_core::Result<Tensor> {
        let (weight, bias) = if track_grad {
            (self.weight.as_tensor().clone(), self.bias.as_tensor().clone())
        } else {
            (self.weight.as_tensor().detach(), self.bias.as_tensor().detach())
        };
        let out = aggregator.propagate(h, &weight)?.broadcast_add(&bias)?;
        match self.activation {
            Some(act) => act.apply(&out),
            None => Ok(out),
        }
    }
}

impl fmt::Display for GraphConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphConv(in={}, out={}", self.in_feats(), self.out_feats())?;
        if let Some(act) = self.activation {
            write!(f, ", activation={}", act.name())?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::norm::norm_tensor;
    use candle_core::Device;

    fn star() -> (Graph, Tensor) {
        let ctx = ExecutionContext::cpu(0);
        // 1→0, 2→0, 3→0, 0→1
        let g = Graph::new(4, vec![1, 2, 3, 0], vec![0, 0, 0, 1], &ctx).unwrap();
        let norm = norm_tensor(&g, &ctx).unwrap();
        (g, norm)
    }

    #[test]
    fn test_aggregate_matches_hand_computation() {
        let (g, norm) = star();
        let agg = Aggregator::new(&g, norm, GcnVariant::MessagePassing).unwrap();
        let h = Tensor::new(&[[1f32], [2.0], [3.0], [4.0]], &Device::Cpu).unwrap();
        let out = agg.aggregate(&h).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();

        // in-degree: [3, 1, 0, 0] → norm: [1/√3, 1, 0, 0]
        // node0 = 1/√3 * (2*1 + 3*0 + 4*0) : 始点 2,3 は入次数 0 なので寄与しない
        let inv_sqrt3 = 1.0 / 3f32.sqrt();
        assert!((out[0] - inv_sqrt3 * 2.0).abs() < 1e-6);
        // node1 = 1 * (1/√3 * 1)
        assert!((out[1] - inv_sqrt3).abs() < 1e-6);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn test_variants_agree() {
        let (g, norm) = star();
        let mut rng = ExecutionContext::cpu(3).rng(0);
        let layer = GraphConv::new(3, 2, Some(Activation::Relu), &mut rng, &Device::Cpu).unwrap();
        let h = Tensor::new(
            &[[1f32, 0.5, -1.0], [0.0, 2.0, 1.0], [3.0, -1.0, 0.0], [0.5, 0.5, 0.5]],
            &Device::Cpu,
        )
        .unwrap();

        let run = |variant| {
            let agg = Aggregator::new(&g, norm.clone(), variant).unwrap();
            layer.forward(&agg, &h, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap()
        };
        let base = run(GcnVariant::GraphConv);
        for variant in [GcnVariant::MessagePassing, GcnVariant::EdgeWeighted] {
            let other = run(variant);
            for (a, b) in base.iter().zip(&other) {
                assert!((a - b).abs() < 1e-5, "{variant:?}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_glorot_bounds_and_zero_bias() {
        let mut rng = ExecutionContext::cpu(1).rng(0);
        let layer = GraphConv::new(10, 6, None, &mut rng, &Device::Cpu).unwrap();
        let bound = (6.0f32 / 16.0).sqrt();
        let w = layer.weight.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(w.iter().all(|v| v.abs() <= bound));
        let b = layer.bias.as_tensor().to_vec1::<f32>().unwrap();
        assert!(b.iter().all(|&v| v == 0.0));
        assert_eq!(layer.param_count(), 66);
        assert_eq!(layer.to_string(), "GraphConv(in=10, out=6)");
    }
}
