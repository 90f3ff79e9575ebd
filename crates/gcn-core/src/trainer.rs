//! 学習ループ
//!
//! エポック単位で 順伝播 → 学習マスク上の交差エントロピー → 逆伝播 → Adam 更新 →
//! 検証精度の計算 を繰り返す。

use std::fmt;
use std::time::Instant;

use candle_core::Tensor;
use serde::Serialize;

use crate::context::ExecutionContext;
use crate::dataset::NodeDataset;
use crate::error::{GcnError, GcnResult};
use crate::evaluator::evaluate;
use crate::layers::{Activation, GcnVariant};
use crate::logging::StructuredLogger;
use crate::model::{Gcn, GcnConfig, Mode, NodeClassifier, check_layer_shape};
use crate::norm::norm_tensor;
use crate::optimizer::{Adam, Optimizer};

/// 計時から除外する最初のエポック数（ウォームアップ）
pub const TIMING_WARMUP_EPOCHS: usize = 3;

/// 学習設定
#[derive(Clone, Debug, Serialize)]
pub struct TrainConfig {
    /// エポック数
    pub n_epochs: usize,
    /// 学習率
    pub lr: f64,
    /// 重み減衰（L2）
    pub weight_decay: f64,
    /// 隠れ層の次元
    pub n_hidden: usize,
    /// 隠れ層の数
    pub n_layers: usize,
    /// dropout 確率
    pub dropout: f32,
    pub activation: Activation,
    pub variant: GcnVariant,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_epochs: 200,
            lr: 1e-2,
            weight_decay: 5e-4,
            n_hidden: 64,
            n_layers: 1,
            dropout: 0.5,
            activation: Activation::Relu,
            variant: GcnVariant::GraphConv,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> GcnResult<()> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(GcnError::config(format!("--lr must be > 0, got {}", self.lr)));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(GcnError::config(format!(
                "--weight-decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        check_layer_shape(self.n_hidden, self.n_layers, self.dropout)
    }

    /// データセットの次元と合わせてモデル構成を作る
    pub fn model_config(&self, in_feats: usize, n_classes: usize) -> GcnConfig {
        GcnConfig {
            in_feats,
            n_hidden: self.n_hidden,
            n_classes,
            n_layers: self.n_layers,
            activation: self.activation,
            dropout: self.dropout,
            variant: self.variant,
        }
    }
}

/// 学習ループの状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainState {
    /// データ・モデル・オプティマイザの準備済み
    Init,
    /// 直前に完了したエポック
    Epoch(usize),
    /// 最終評価まで完了
    Done,
}

/// 1 エポック分の結果
#[derive(Clone, Debug, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f32,
    pub val_accuracy: f64,
    /// ウォームアップ後のエポック時間の平均（秒）
    pub mean_duration: Option<f64>,
    /// 1 秒あたりに処理した辺数（千単位）
    pub kteps: Option<f64>,
}

impl fmt::Display for EpochStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Epoch {:05} | Time(s) {:.4} | Loss {:.4} | Accuracy {:.4} | ETputs(KTEPS) {:.2}",
            self.epoch,
            self.mean_duration.unwrap_or(f64::NAN),
            self.loss,
            self.val_accuracy,
            self.kteps.unwrap_or(f64::NAN)
        )
    }
}

/// 学習全体の結果
#[derive(Clone, Debug, Serialize)]
pub struct TrainReport {
    pub epochs: usize,
    pub final_val_accuracy: f64,
    /// テストマスクが空の場合は `None`
    pub test_accuracy: Option<f64>,
    /// 計時対象エポックの合計時間（秒）
    pub training_time: f64,
    /// 学習開始から終了までの時間（秒）
    pub wall_time: f64,
    pub losses: Vec<f32>,
}

impl fmt::Display for TrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Validation accuracy {:.2}%", self.final_val_accuracy * 100.0)?;
        if let Some(acc) = self.test_accuracy {
            writeln!(f, "Test accuracy {:.2}%", acc * 100.0)?;
        }
        write!(
            f,
            "Training Time Consuming: {:.4}, all time cost: {:.4}",
            self.training_time, self.wall_time
        )
    }
}

/// 平均エポック時間とスループット（KTEPS）
fn throughput(durations: &[f64], num_edges: usize) -> (Option<f64>, Option<f64>) {
    if durations.is_empty() {
        return (None, None);
    }
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    (Some(mean), Some(num_edges as f64 / mean / 1000.0))
}

/// トレーナー
pub struct Trainer<M: NodeClassifier, O: Optimizer> {
    config: TrainConfig,
    dataset: NodeDataset,
    model: M,
    optimizer: O,
    state: TrainState,
    durations: Vec<f64>,
    losses: Vec<f32>,
    started: Instant,
    structured: Option<StructuredLogger>,
    echo: bool,
    /// 構造化ログが stdout を使う場合、エポック行は stderr に出す
    human_to_stderr: bool,
}

impl Trainer<Gcn, Adam> {
    /// データセットから正規化係数・GCN・Adam を用意する
    pub fn init(
        config: TrainConfig,
        dataset: NodeDataset,
        ctx: &ExecutionContext,
    ) -> GcnResult<Self> {
        config.validate()?;
        let norm = norm_tensor(&dataset.graph, ctx)?;
        let model_config = config.model_config(dataset.in_feats(), dataset.num_classes);
        let model = Gcn::new(&dataset.graph, norm, &model_config, ctx)?;
        log::info!("model parameters: {}", model.param_count());
        let optimizer = Adam::new(model.vars(), config.lr)?.with_weight_decay(config.weight_decay);
        Ok(Self::new(config, dataset, model, optimizer))
    }
}

impl<M: NodeClassifier, O: Optimizer> Trainer<M, O> {
    pub fn new(config: TrainConfig, dataset: NodeDataset, model: M, optimizer: O) -> Self {
        Self {
            config,
            dataset,
            model,
            optimizer,
            state: TrainState::Init,
            durations: Vec::new(),
            losses: Vec::new(),
            started: Instant::now(),
            structured: None,
            echo: true,
            human_to_stderr: false,
        }
    }

    /// 構造化ログの出力先を設定
    pub fn with_structured_logger(mut self, logger: StructuredLogger) -> Self {
        self.human_to_stderr = logger.to_stdout;
        self.structured = Some(logger);
        self
    }

    /// エポック行を stdout に出すかどうか
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn dataset(&self) -> &NodeDataset {
        &self.dataset
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    /// 学習マスク上の交差エントロピー
    fn train_loss(&self, logits: &Tensor) -> GcnResult<Tensor> {
        let mask = &self.dataset.train_mask;
        if mask.is_empty() {
            return Err(GcnError::EmptyMask(mask.name()));
        }
        let logits = logits.index_select(mask.index(), 0)?;
        let labels = self.dataset.labels.index_select(mask.index(), 0)?;
        Ok(candle_nn::loss::cross_entropy(&logits, &labels)?)
    }

    /// 1 エポックの学習と検証
    pub fn run_epoch(&mut self) -> GcnResult<EpochStats> {
        let epoch = match self.state {
            TrainState::Init => 0,
            TrainState::Epoch(prev) => prev + 1,
            TrainState::Done => {
                return Err(GcnError::config("training has already finished"));
            }
        };

        self.model.set_mode(Mode::Train);
        let t0 = (epoch >= TIMING_WARMUP_EPOCHS).then(Instant::now);

        // forward
        let logits = self.model.forward(&self.dataset.features)?;
        let loss = self.train_loss(&logits)?;
        self.optimizer.backward_step(&loss)?;
        let loss = loss.to_scalar::<f32>()?;

        if let Some(t0) = t0 {
            self.durations.push(t0.elapsed().as_secs_f64());
        }

        let val_accuracy = evaluate(
            &mut self.model,
            &self.dataset.features,
            &self.dataset.labels,
            &self.dataset.val_mask,
        )?;
        let (mean_duration, kteps) = throughput(&self.durations, self.dataset.graph.num_edges());

        self.losses.push(loss);
        self.state = TrainState::Epoch(epoch);

        let stats = EpochStats {
            epoch,
            loss,
            val_accuracy,
            mean_duration,
            kteps,
        };
        if self.echo {
            if self.human_to_stderr {
                eprintln!("{stats}");
            } else {
                println!("{stats}");
            }
        }
        if let Some(ref lg) = self.structured {
            lg.write_record("epoch", serde_json::to_value(&stats).unwrap_or_default());
        }
        Ok(stats)
    }

    /// 設定されたエポック数だけ学習し、最終評価を返す
    pub fn run(&mut self) -> GcnResult<TrainReport> {
        if let Some(ref lg) = self.structured {
            lg.write_record(
                "config",
                serde_json::json!({
                    "config": &self.config,
                    "data": self.dataset.statistics(),
                }),
            );
        }
        let remaining = match self.state {
            TrainState::Init => self.config.n_epochs,
            TrainState::Epoch(e) => self.config.n_epochs.saturating_sub(e + 1),
            TrainState::Done => 0,
        };
        for _ in 0..remaining {
            self.run_epoch()?;
        }
        self.finish()
    }

    /// 最終的な検証精度・テスト精度・時間を集計する
    pub fn finish(&mut self) -> GcnResult<TrainReport> {
        let data = &self.dataset;
        let final_val_accuracy =
            evaluate(&mut self.model, &data.features, &data.labels, &data.val_mask)?;
        let test_accuracy = if data.test_mask.is_empty() {
            None
        } else {
            Some(evaluate(&mut self.model, &data.features, &data.labels, &data.test_mask)?)
        };

        let report = TrainReport {
            epochs: self.losses.len(),
            final_val_accuracy,
            test_accuracy,
            training_time: self.durations.iter().sum(),
            wall_time: self.started.elapsed().as_secs_f64(),
            losses: self.losses.clone(),
        };
        self.state = TrainState::Done;

        if let Some(ref lg) = self.structured {
            lg.write_record(
                "summary",
                serde_json::json!({
                    "epochs": report.epochs,
                    "val_accuracy": report.final_val_accuracy,
                    "test_accuracy": report.test_accuracy,
                    "training_time": report.training_time,
                    "wall_time": report.wall_time,
                }),
            );
            if let Err(e) = lg.flush() {
                log::warn!("failed to flush structured log: {e}");
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_excludes_nothing_until_durations_exist() {
        assert_eq!(throughput(&[], 1000), (None, None));
        let (mean, kteps) = throughput(&[0.5, 1.5], 4000);
        assert_eq!(mean, Some(1.0));
        assert_eq!(kteps, Some(4.0));
    }

    #[test]
    fn test_epoch_line_format() {
        let stats = EpochStats {
            epoch: 7,
            loss: 0.6931,
            val_accuracy: 0.5,
            mean_duration: Some(0.01234),
            kteps: Some(81.0),
        };
        assert_eq!(
            stats.to_string(),
            "Epoch 00007 | Time(s) 0.0123 | Loss 0.6931 | Accuracy 0.5000 | ETputs(KTEPS) 81.00"
        );

        let warmup = EpochStats {
            mean_duration: None,
            kteps: None,
            ..stats
        };
        assert!(warmup.to_string().contains("Time(s) NaN"));
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        let bad_lr = TrainConfig {
            lr: 0.0,
            ..TrainConfig::default()
        };
        assert!(matches!(bad_lr.validate(), Err(GcnError::Configuration(_))));
        let bad_wd = TrainConfig {
            weight_decay: -1.0,
            ..TrainConfig::default()
        };
        assert!(matches!(bad_wd.validate(), Err(GcnError::Configuration(_))));
        let bad_dropout = TrainConfig {
            dropout: 1.5,
            ..TrainConfig::default()
        };
        assert!(matches!(bad_dropout.validate(), Err(GcnError::Configuration(_))));
    }

    fn toy_trainer() -> Trainer<Gcn, Adam> {
        let ctx = ExecutionContext::cpu(5);
        let data = crate::dataset::GraphData {
            num_nodes: 2,
            feat_dim: 1,
            feat: vec![1.0, -1.0],
            labels: vec![0, 1],
            train_mask: vec![true, true],
            val_mask: vec![true, true],
            test_mask: vec![false, false],
            src: vec![0, 1],
            dst: vec![1, 0],
        };
        let dataset = NodeDataset::from_graph_data(data, 2, &ctx).unwrap();
        Trainer::init(TrainConfig { n_epochs: 1, ..TrainConfig::default() }, dataset, &ctx).unwrap()
    }

    #[test]
    fn test_stdout_structured_log_moves_epoch_lines_to_stderr() {
        let trainer = toy_trainer();
        assert!(!trainer.human_to_stderr);
        let trainer = trainer.with_structured_logger(StructuredLogger::new("-").unwrap());
        assert!(trainer.human_to_stderr);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        let file_logger = StructuredLogger::new(path.to_str().unwrap()).unwrap();
        let trainer = toy_trainer().with_structured_logger(file_logger);
        assert!(!trainer.human_to_stderr);
    }
}
