/// 合成グラフコレクションの生成
///
/// 使い方:
///   make_synthetic_graph --output graph.safetensors --nodes 2000 --classes 8
use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::Parser;
use gcn_core::save_graph_collection;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tools::synthetic::{SyntheticParams, generate};

#[derive(Parser)]
#[command(about = "train_gcn 用の合成グラフを生成する")]
struct Cli {
    /// 出力ファイル（safetensors）
    #[arg(long)]
    output: PathBuf,

    /// ノード数
    #[arg(long, default_value_t = 1000)]
    nodes: usize,

    /// ノードあたりの出次数（各辺は双方向に張る）
    #[arg(long, default_value_t = 8)]
    avg_degree: usize,

    /// 特徴次元
    #[arg(long, default_value_t = 32)]
    feat_dim: usize,

    /// クラス数
    #[arg(long, default_value_t = 4)]
    classes: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// 学習ノードの割合
    #[arg(long, default_value_t = 0.6)]
    train_frac: f64,

    /// 検証ノードの割合（残りはテスト）
    #[arg(long, default_value_t = 0.2)]
    val_frac: f64,

    /// 生成するグラフ数
    #[arg(long, default_value_t = 1)]
    graphs: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    ensure!(cli.graphs > 0, "--graphs must be > 0");

    let params = SyntheticParams {
        nodes: cli.nodes,
        avg_degree: cli.avg_degree,
        feat_dim: cli.feat_dim,
        classes: cli.classes,
        train_frac: cli.train_frac,
        val_frac: cli.val_frac,
        ..SyntheticParams::default()
    };
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let graphs = (0..cli.graphs)
        .map(|_| generate(&params, &mut rng))
        .collect::<Result<Vec<_>>>()?;

    save_graph_collection(&cli.output, &graphs)?;
    log::info!(
        "wrote {} graph(s) with {} nodes and {} edges each to {}",
        graphs.len(),
        params.nodes,
        params.nodes * params.avg_degree * 2,
        cli.output.display()
    );
    Ok(())
}
