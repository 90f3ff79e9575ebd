//! 次数に基づく対称正規化係数
//!
//! `norm[v] = in_degree(v)^(-1/2)`。入次数 0 のノードは 0 とする。

use candle_core::Tensor;

use crate::context::ExecutionContext;
use crate::error::GcnResult;
use crate::graph::Graph;

/// 入次数列から正規化係数を計算する
pub fn symmetric_norm(in_degrees: &[u32]) -> Vec<f32> {
    in_degrees
        .iter()
        .map(|&d| {
            let n = (d as f32).powf(-0.5);
            if n.is_finite() { n } else { 0.0 }
        })
        .collect()
}

/// グラフの正規化係数を `[N, 1]` テンソルとしてデバイスに置く
pub fn norm_tensor(graph: &Graph, ctx: &ExecutionContext) -> GcnResult<Tensor> {
    let norm = symmetric_norm(&graph.in_degrees());
    Ok(Tensor::from_vec(norm, (graph.num_nodes(), 1), ctx.device())?)
}
