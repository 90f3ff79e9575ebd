//! グラフ構造
//!
//! COO 形式（src/dst のペア）で辺を保持する。ホスト側のインデックスは次数計算と
//! 検証に、デバイス側のテンソルは近傍集約に使う。

use candle_core::Tensor;

use crate::context::ExecutionContext;
use crate::error::{GcnError, GcnResult};

/// 読み込み後は変更されない有向グラフ（メッセージは src → dst に流れる）
#[derive(Clone, Debug)]
pub struct Graph {
    num_nodes: usize,
    src: Vec<u32>,
    dst: Vec<u32>,
    src_index: Tensor,
    dst_index: Tensor,
}

impl Graph {
    /// 辺リストからグラフを構築する
    ///
    /// `src` と `dst` の長さが異なる場合や、端点が `num_nodes` 以上の場合は
    /// `DatasetFormat` エラー。
    pub fn new(
        num_nodes: usize,
        src: Vec<u32>,
        dst: Vec<u32>,
        ctx: &ExecutionContext,
    ) -> GcnResult<Self> {
        if src.len() != dst.len() {
            return Err(GcnError::format(format!(
                "edge endpoint length mismatch: src={}, dst={}",
                src.len(),
                dst.len()
            )));
        }
        if let Some((i, &v)) =
            src.iter().chain(dst.iter()).enumerate().find(|&(_, &v)| v as usize >= num_nodes)
        {
            return Err(GcnError::format(format!(
                "edge endpoint {v} (entry {i}) is out of range for {num_nodes} nodes"
            )));
        }

        let num_edges = src.len();
        let src_index = Tensor::from_slice(&src, num_edges, ctx.device())?;
        let dst_index = Tensor::from_slice(&dst, num_edges, ctx.device())?;
        Ok(Self {
            num_nodes,
            src,
            dst,
            src_index,
            dst_index,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// 辺の始点インデックス `[E]`（u32）
    pub fn src_index(&self) -> &Tensor {
        &self.src_index
    }

    /// 辺の終点インデックス `[E]`（u32）
    pub fn dst_index(&self) -> &Tensor {
        &self.dst_index
    }

    /// 各ノードの入次数
    pub fn in_degrees(&self) -> Vec<u32> {
        let mut degs = vec![0u32; self.num_nodes];
        for &v in &self.dst {
            degs[v as usize] += 1;
        }
        degs
    }
}
