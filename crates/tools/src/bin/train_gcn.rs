/// GCN ノード分類の学習
///
/// 使い方:
///   # 既定パスの Amazon2M で学習
///   train_gcn --dataset amazon2m --n-epochs 200
///
///   # 任意のファイルを CPU で学習し、構造化ログを残す
///   train_gcn --data-path graph.safetensors --gpu -1 --structured-log train.jsonl
///
///   # 構造化ログを stdout に流す（人間向けの出力は stderr へ）
///   train_gcn --data-path graph.safetensors --structured-log - | jq .
use std::fmt::Display;

use anyhow::{Context, Result};
use clap::Parser;
use gcn_core::{ExecutionContext, StructuredLogger, Trainer, load_graph_collection};
use tools::cli::TrainArgs;
use tools::error_messages::{
    ERR_DATASET_LOAD, ERR_INVALID_CONFIG, WARN_SELF_LOOP_IGNORED, WARN_STRUCTURED_LOG_OPEN,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = TrainArgs::parse();
    run(&args)
}

/// 人間向けの出力。構造化ログが stdout を使うときは stderr に回す
fn human(to_stderr: bool, msg: impl Display) {
    if to_stderr {
        eprintln!("{msg}");
    } else {
        println!("{msg}");
    }
}

fn run(args: &TrainArgs) -> Result<()> {
    let structured_logger = args.structured_log.as_deref().and_then(|target| {
        match StructuredLogger::new(target) {
            Ok(logger) => Some(logger),
            Err(e) => {
                log::warn!("{WARN_STRUCTURED_LOG_OPEN} '{target}': {e}");
                None
            }
        }
    });
    let human_to_stderr = structured_logger.as_ref().map(|lg| lg.to_stdout).unwrap_or(false);
    human(human_to_stderr, format_args!("{args:?}"));

    let config = args.train_config();
    config.validate().context(ERR_INVALID_CONFIG)?;
    if args.self_loop {
        log::warn!("{WARN_SELF_LOOP_IGNORED}");
    }

    let ctx = ExecutionContext::from_gpu_index(args.gpu, args.seed)?;
    let kind = args.dataset_kind();
    let path = args.data_path();
    log::info!("loading {} from {}", kind.name(), path.display());
    let dataset = load_graph_collection(&path, kind.num_classes(), &ctx)
        .with_context(|| format!("{ERR_DATASET_LOAD}: {}", path.display()))?;
    human(human_to_stderr, dataset.statistics());

    let mut trainer = Trainer::init(config, dataset, &ctx)?;
    human(human_to_stderr, trainer.model());
    if let Some(logger) = structured_logger {
        trainer = trainer.with_structured_logger(logger);
    }

    let report = trainer.run()?;
    human(human_to_stderr, "");
    human(human_to_stderr, &report);

    if let Some(out) = &args.save_model {
        trainer.model().save_parameters(out)?;
        human(human_to_stderr, format_args!("Saved model parameters to {}", out.display()));
    }
    Ok(())
}
