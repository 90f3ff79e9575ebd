//! 合成グラフの生成
//!
//! クラスごとの代表ベクトルにノイズを加えた特徴と、同じクラスのノードへ偏った
//! 辺を持つグラフを作る。実データなしで学習パイプラインを通すためのもの。

use anyhow::{Result, ensure};
use gcn_core::GraphData;
use rand::Rng;
use rand::seq::SliceRandom;

/// 生成パラメータ
#[derive(Clone, Debug)]
pub struct SyntheticParams {
    pub nodes: usize,
    /// ノードあたりの出次数
    pub avg_degree: usize,
    pub feat_dim: usize,
    pub classes: usize,
    pub train_frac: f64,
    pub val_frac: f64,
    /// 辺の終点を同じクラスから選ぶ確率
    pub homophily: f64,
    /// 特徴に加えるノイズの振幅
    pub noise: f32,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            nodes: 1000,
            avg_degree: 8,
            feat_dim: 32,
            classes: 4,
            train_frac: 0.6,
            val_frac: 0.2,
            homophily: 0.8,
            noise: 0.5,
        }
    }
}

impl SyntheticParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.nodes > 0, "--nodes must be > 0");
        ensure!(self.feat_dim > 0, "--feat-dim must be > 0");
        ensure!(self.classes >= 2, "--classes must be >= 2");
        ensure!(self.classes <= self.nodes, "--classes must not exceed --nodes");
        ensure!(
            self.train_frac >= 0.0
                && self.val_frac >= 0.0
                && self.train_frac + self.val_frac <= 1.0,
            "--train-frac and --val-frac must be non-negative and sum to at most 1"
        );
        ensure!((0.0..=1.0).contains(&self.homophily), "homophily must be in [0, 1]");
        Ok(())
    }
}

/// 1 グラフ分のデータを生成する
pub fn generate<R: Rng>(params: &SyntheticParams, rng: &mut R) -> Result<GraphData> {
    params.validate()?;
    let n = params.nodes;

    // 全クラスが最低 1 ノード持つようにラベルを巡回で割り当ててからシャッフル
    let mut labels: Vec<u32> = (0..n).map(|i| (i % params.classes) as u32).collect();
    labels.shuffle(rng);

    let mut members: Vec<Vec<u32>> = vec![Vec::new(); params.classes];
    for (node, &label) in labels.iter().enumerate() {
        members[label as usize].push(node as u32);
    }

    let prototypes: Vec<Vec<f32>> = (0..params.classes)
        .map(|_| (0..params.feat_dim).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect();
    let mut feat = Vec::with_capacity(n * params.feat_dim);
    for &label in &labels {
        for &p in &prototypes[label as usize] {
            feat.push(p + params.noise * rng.random_range(-1.0f32..1.0));
        }
    }

    let mut src = Vec::with_capacity(n * params.avg_degree);
    let mut dst = Vec::with_capacity(n * params.avg_degree);
    for (node, &label) in labels.iter().enumerate() {
        for _ in 0..params.avg_degree {
            let target = if rng.random_bool(params.homophily) {
                let same = &members[label as usize];
                same[rng.random_range(0..same.len())]
            } else {
                rng.random_range(0..n as u32)
            };
            // 双方向に張る
            src.push(node as u32);
            dst.push(target);
            src.push(target);
            dst.push(node as u32);
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let n_train = (n as f64 * params.train_frac).round() as usize;
    let n_val = ((n as f64 * params.val_frac).round() as usize).min(n - n_train.min(n));
    let mut train_mask = vec![false; n];
    let mut val_mask = vec![false; n];
    let mut test_mask = vec![false; n];
    for (rank, &node) in order.iter().enumerate() {
        if rank < n_train {
            train_mask[node] = true;
        } else if rank < n_train + n_val {
            val_mask[node] = true;
        } else {
            test_mask[node] = true;
        }
    }

    Ok(GraphData {
        num_nodes: n,
        feat_dim: params.feat_dim,
        feat,
        labels,
        train_mask,
        val_mask,
        test_mask,
        src,
        dst,
    })
}
