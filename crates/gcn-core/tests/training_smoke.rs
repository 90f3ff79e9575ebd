use gcn_core::{
    Activation, ExecutionContext, GcnError, GcnVariant, GraphData, NodeClassifier, NodeDataset,
    TrainConfig, TrainState, Trainer, evaluate, load_graph_collection, save_graph_collection,
};

/// 2 クラス × 2 ノードの玩具グラフ（0↔1, 2↔3）
fn toy_graph() -> GraphData {
    GraphData {
        num_nodes: 4,
        feat_dim: 2,
        feat: vec![1.0, 0.0, 0.9, 0.1, 0.1, 0.9, 0.0, 1.0],
        labels: vec![0, 0, 1, 1],
        train_mask: vec![true; 4],
        val_mask: vec![true; 4],
        test_mask: vec![false, true, false, true],
        src: vec![0, 1, 2, 3],
        dst: vec![1, 0, 3, 2],
    }
}

fn deterministic_config(n_epochs: usize, variant: GcnVariant) -> TrainConfig {
    TrainConfig {
        n_epochs,
        lr: 0.01,
        weight_decay: 0.0,
        n_hidden: 8,
        n_layers: 1,
        dropout: 0.0,
        activation: Activation::Relu,
        variant,
    }
}

fn snapshot<M: NodeClassifier>(model: &M) -> Vec<Vec<f32>> {
    model
        .vars()
        .iter()
        .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap())
        .collect()
}

#[test]
fn loss_is_non_increasing_without_dropout() {
    for variant in [GcnVariant::GraphConv, GcnVariant::MessagePassing, GcnVariant::EdgeWeighted] {
        let ctx = ExecutionContext::cpu(42);
        let dataset = NodeDataset::from_graph_data(toy_graph(), 2, &ctx).unwrap();
        let mut trainer = Trainer::init(deterministic_config(20, variant), dataset, &ctx)
            .unwrap()
            .with_echo(false);

        let report = trainer.run().unwrap();
        assert_eq!(report.losses.len(), 20);
        for pair in report.losses.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "{variant:?}: loss went up: {:?}", report.losses);
        }
        assert!(report.losses[19] < report.losses[0]);
        assert!((0.0..=1.0).contains(&report.final_val_accuracy));
        assert_eq!(trainer.state(), TrainState::Done);
    }
}

#[test]
fn zero_epochs_reports_initial_accuracy_without_updates() {
    let ctx = ExecutionContext::cpu(7);
    let dataset = NodeDataset::from_graph_data(toy_graph(), 2, &ctx).unwrap();
    let mut trainer = Trainer::init(deterministic_config(0, GcnVariant::GraphConv), dataset, &ctx)
        .unwrap()
        .with_echo(false);

    let before = snapshot(trainer.model());
    let initial = {
        let features = trainer.dataset().features.clone();
        let labels = trainer.dataset().labels.clone();
        let val = trainer.dataset().val_mask.clone();
        evaluate(trainer.model_mut(), &features, &labels, &val).unwrap()
    };

    let report = trainer.run().unwrap();
    assert_eq!(report.epochs, 0);
    assert!(report.losses.is_empty());
    assert_eq!(report.training_time, 0.0);
    assert_eq!(report.final_val_accuracy, initial);
    assert_eq!(snapshot(trainer.model()), before);
}

#[test]
fn epochs_update_parameters_and_timing_skips_warmup() {
    let ctx = ExecutionContext::cpu(3);
    let dataset = NodeDataset::from_graph_data(toy_graph(), 2, &ctx).unwrap();
    let config = TrainConfig {
        n_epochs: 5,
        ..TrainConfig::default()
    };
    let mut trainer = Trainer::init(config, dataset, &ctx)
        .unwrap()
        .with_echo(false);

    let before = snapshot(trainer.model());
    let mut stats = Vec::new();
    for _ in 0..5 {
        stats.push(trainer.run_epoch().unwrap());
    }
    assert_ne!(snapshot(trainer.model()), before);
    assert_eq!(stats.iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert!(stats[..3].iter().all(|s| s.mean_duration.is_none() && s.kteps.is_none()));
    assert!(stats[3..].iter().all(|s| s.mean_duration.is_some() && s.kteps.is_some()));

    let report = trainer.finish().unwrap();
    assert_eq!(report.epochs, 5);
    assert!(report.test_accuracy.is_some());
    assert!(matches!(trainer.run_epoch(), Err(GcnError::Configuration(_))));
}

#[test]
fn empty_train_mask_aborts_training() {
    let ctx = ExecutionContext::cpu(0);
    let mut data = toy_graph();
    data.train_mask = vec![false; 4];
    let dataset = NodeDataset::from_graph_data(data, 2, &ctx).unwrap();
    let mut trainer = Trainer::init(deterministic_config(3, GcnVariant::GraphConv), dataset, &ctx)
        .unwrap()
        .with_echo(false);
    assert!(matches!(trainer.run(), Err(GcnError::EmptyMask("train"))));
}

#[test]
fn trains_from_serialized_collection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toy.safetensors");
    save_graph_collection(&path, &[toy_graph()]).unwrap();

    let ctx = ExecutionContext::cpu(1);
    let dataset = load_graph_collection(&path, 2, &ctx).unwrap();
    assert_eq!(dataset.statistics().num_edges, 4);

    let log_path = dir.path().join("train.jsonl");
    let logger = gcn_core::StructuredLogger::new(log_path.to_str().unwrap()).unwrap();
    let config = deterministic_config(4, GcnVariant::EdgeWeighted);
    let mut trainer = Trainer::init(config, dataset, &ctx)
        .unwrap()
        .with_echo(false)
        .with_structured_logger(logger);
    trainer.run().unwrap();

    let text = std::fs::read_to_string(&log_path).unwrap();
    let phases: Vec<String> = text
        .lines()
        .map(|l| {
            let record: serde_json::Value = serde_json::from_str(l).unwrap();
            record["phase"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(phases, vec!["config", "epoch", "epoch", "epoch", "epoch", "summary"]);
}
