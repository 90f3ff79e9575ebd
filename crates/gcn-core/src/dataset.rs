//! ノード分類データセット
//!
//! safetensors 形式のグラフコレクションを読み書きする。各グラフの属性は
//! `"{graph_id}.{attr}"` というキーで格納され、学習時はちょうど 1 つのグラフを含む
//! ファイルのみを受け付ける。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use serde::Serialize;

use crate::context::ExecutionContext;
use crate::error::{GcnError, GcnResult};
use crate::graph::Graph;

pub const ATTR_FEAT: &str = "feat";
pub const ATTR_LABEL: &str = "label";
pub const ATTR_TRAIN_MASK: &str = "train_mask";
pub const ATTR_VAL_MASK: &str = "val_mask";
pub const ATTR_TEST_MASK: &str = "test_mask";
pub const ATTR_SRC: &str = "src";
pub const ATTR_DST: &str = "dst";

const KNOWN_ATTRS: [&str; 7] = [
    ATTR_FEAT,
    ATTR_LABEL,
    ATTR_TRAIN_MASK,
    ATTR_VAL_MASK,
    ATTR_TEST_MASK,
    ATTR_SRC,
    ATTR_DST,
];

/// Amazon2M のクラス数（ラベルから導出せず固定値として扱う）
pub const AMAZON2M_NUM_CLASSES: usize = 47;

/// 学習対象のデータセット
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    Amazon2M,
}

impl DatasetKind {
    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Amazon2M => "amazon2m",
        }
    }

    /// 既定の読み込みパス
    pub fn default_path(self) -> PathBuf {
        match self {
            DatasetKind::Amazon2M => PathBuf::from("datasets/amazon2m/amazon2m.safetensors"),
        }
    }

    /// データセット固有のクラス数
    pub fn num_classes(self) -> usize {
        match self {
            DatasetKind::Amazon2M => AMAZON2M_NUM_CLASSES,
        }
    }
}

/// ノード集合を選択する真偽値マスク
#[derive(Clone, Debug)]
pub struct Mask {
    name: &'static str,
    index: Tensor,
}

impl Mask {
    pub fn from_flags(
        name: &'static str,
        flags: &[bool],
        ctx: &ExecutionContext,
    ) -> GcnResult<Self> {
        let ids: Vec<u32> =
            flags.iter().enumerate().filter(|&(_, &f)| f).map(|(i, _)| i as u32).collect();
        let len = ids.len();
        let index = Tensor::from_vec(ids, len, ctx.device())?;
        Ok(Self { name, index })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 選択されたノード ID `[|mask|]`（u32）
    pub fn index(&self) -> &Tensor {
        &self.index
    }

    /// 選択されたノード数
    pub fn len(&self) -> usize {
        self.index.dim(0).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ホスト側に展開された 1 グラフ分の生データ（書き出し用）
#[derive(Clone, Debug, Default)]
pub struct GraphData {
    pub num_nodes: usize,
    pub feat_dim: usize,
    /// 行優先 `[num_nodes * feat_dim]`
    pub feat: Vec<f32>,
    pub labels: Vec<u32>,
    pub train_mask: Vec<bool>,
    pub val_mask: Vec<bool>,
    pub test_mask: Vec<bool>,
    pub src: Vec<u32>,
    pub dst: Vec<u32>,
}

/// 学習に必要なテンソル一式
#[derive(Debug)]
pub struct NodeDataset {
    pub graph: Graph,
    /// `[N, F]` f32
    pub features: Tensor,
    /// `[N]` u32
    pub labels: Tensor,
    pub train_mask: Mask,
    pub val_mask: Mask,
    pub test_mask: Mask,
    pub num_classes: usize,
}

/// 学習開始時に表示するデータ統計
#[derive(Clone, Debug, Serialize)]
pub struct DatasetStatistics {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub in_feats: usize,
    pub num_classes: usize,
    pub train_samples: usize,
    pub val_samples: usize,
    pub test_samples: usize,
}

impl fmt::Display for DatasetStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----Data statistics------")?;
        writeln!(f, "  #Nodes {}", self.num_nodes)?;
        writeln!(f, "  #Edges {}", self.num_edges)?;
        writeln!(f, "  #Features {}", self.in_feats)?;
        writeln!(f, "  #Classes {}", self.num_classes)?;
        writeln!(f, "  #Train samples {}", self.train_samples)?;
        writeln!(f, "  #Val samples {}", self.val_samples)?;
        write!(f, "  #Test samples {}", self.test_samples)
    }
}

impl NodeDataset {
    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn in_feats(&self) -> usize {
        self.features.dim(1).unwrap_or(0)
    }

    pub fn statistics(&self) -> DatasetStatistics {
        DatasetStatistics {
            num_nodes: self.num_nodes(),
            num_edges: self.graph.num_edges(),
            in_feats: self.in_feats(),
            num_classes: self.num_classes,
            train_samples: self.train_mask.len(),
            val_samples: self.val_mask.len(),
            test_samples: self.test_mask.len(),
        }
    }

    /// ホスト側の生データからデータセットを組み立てる
    pub fn from_graph_data(
        data: GraphData,
        num_classes: usize,
        ctx: &ExecutionContext,
    ) -> GcnResult<Self> {
        let n = data.num_nodes;
        if data.feat.len() != n * data.feat_dim {
            return Err(GcnError::format(format!(
                "'{ATTR_FEAT}' has {} values, expected {n} x {}",
                data.feat.len(),
                data.feat_dim
            )));
        }
        check_len(ATTR_LABEL, data.labels.len(), n)?;
        check_len(ATTR_TRAIN_MASK, data.train_mask.len(), n)?;
        check_len(ATTR_VAL_MASK, data.val_mask.len(), n)?;
        check_len(ATTR_TEST_MASK, data.test_mask.len(), n)?;
        check_labels(&data.labels, num_classes)?;

        let graph = Graph::new(n, data.src, data.dst, ctx)?;
        let features = Tensor::from_vec(data.feat, (n, data.feat_dim), ctx.device())?;
        let labels = Tensor::from_vec(data.labels, n, ctx.device())?;
        Ok(Self {
            graph,
            features,
            labels,
            train_mask: Mask::from_flags("train", &data.train_mask, ctx)?,
            val_mask: Mask::from_flags("val", &data.val_mask, ctx)?,
            test_mask: Mask::from_flags("test", &data.test_mask, ctx)?,
            num_classes,
        })
    }
}

/// グラフコレクションを読み込み、唯一のグラフをデータセットとして返す
pub fn load_graph_collection<P: AsRef<Path>>(
    path: P,
    num_classes: usize,
    ctx: &ExecutionContext,
) -> GcnResult<NodeDataset> {
    let path = path.as_ref();
    std::fs::metadata(path)?;
    let tensors = candle_core::safetensors::load(path, &Device::Cpu).map_err(|e| {
        GcnError::format(format!("failed to read graph collection {}: {e}", path.display()))
    })?;

    let mut graphs = group_by_graph(tensors)?;
    let (graph_id, mut attrs) = match (graphs.len(), graphs.pop_first()) {
        (1, Some(graph)) => graph,
        (count, _) => {
            return Err(GcnError::format(format!(
                "expected exactly one graph in {}, found {count}",
                path.display()
            )));
        }
    };
    log::debug!("loading graph {graph_id} from {}", path.display());

    let feat = take_attr(&mut attrs, graph_id, ATTR_FEAT)?;
    let (num_nodes, feat_dim) = feat
        .dims2()
        .map_err(|_| {
            GcnError::format(format!("'{ATTR_FEAT}' must be rank 2, got {:?}", feat.dims()))
        })?;
    let feat = feat.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

    let data = GraphData {
        num_nodes,
        feat_dim,
        feat,
        labels: index_values(&take_attr(&mut attrs, graph_id, ATTR_LABEL)?, ATTR_LABEL)?,
        train_mask: mask_values(
            &take_attr(&mut attrs, graph_id, ATTR_TRAIN_MASK)?,
            ATTR_TRAIN_MASK,
        )?,
        val_mask: mask_values(&take_attr(&mut attrs, graph_id, ATTR_VAL_MASK)?, ATTR_VAL_MASK)?,
        test_mask: mask_values(&take_attr(&mut attrs, graph_id, ATTR_TEST_MASK)?, ATTR_TEST_MASK)?,
        src: index_values(&take_attr(&mut attrs, graph_id, ATTR_SRC)?, ATTR_SRC)?,
        dst: index_values(&take_attr(&mut attrs, graph_id, ATTR_DST)?, ATTR_DST)?,
    };
    NodeDataset::from_graph_data(data, num_classes, ctx)
}

/// グラフコレクションを書き出す（グラフ ID は 0 から連番）
pub fn save_graph_collection<P: AsRef<Path>>(path: P, graphs: &[GraphData]) -> GcnResult<()> {
    let cpu = Device::Cpu;
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    for (id, g) in graphs.iter().enumerate() {
        let bytes = |m: &[bool]| m.iter().map(|&b| b as u8).collect::<Vec<u8>>();
        tensors.insert(
            format!("{id}.{ATTR_FEAT}"),
            Tensor::from_slice(&g.feat, (g.num_nodes, g.feat_dim), &cpu)?,
        );
        tensors.insert(
            format!("{id}.{ATTR_LABEL}"),
            Tensor::from_slice(&g.labels, g.labels.len(), &cpu)?,
        );
        for (attr, mask) in [
            (ATTR_TRAIN_MASK, &g.train_mask),
            (ATTR_VAL_MASK, &g.val_mask),
            (ATTR_TEST_MASK, &g.test_mask),
        ] {
            tensors.insert(
                format!("{id}.{attr}"),
                Tensor::from_vec(bytes(mask.as_slice()), mask.len(), &cpu)?,
            );
        }
        tensors.insert(format!("{id}.{ATTR_SRC}"), Tensor::from_slice(&g.src, g.src.len(), &cpu)?);
        tensors.insert(format!("{id}.{ATTR_DST}"), Tensor::from_slice(&g.dst, g.dst.len(), &cpu)?);
    }
    candle_core::safetensors::save(&tensors, path.as_ref())?;
    Ok(())
}

type AttrMap = HashMap<String, Tensor>;

fn group_by_graph(tensors: HashMap<String, Tensor>) -> GcnResult<BTreeMap<u64, AttrMap>> {
    let mut graphs: BTreeMap<u64, AttrMap> = BTreeMap::new();
    for (key, tensor) in tensors {
        let Some((id, attr)) = key.split_once('.') else {
            return Err(GcnError::format(format!("unexpected tensor key '{key}'")));
        };
        let id: u64 = id
            .parse()
            .map_err(|_| GcnError::format(format!("unexpected tensor key '{key}'")))?;
        if !KNOWN_ATTRS.contains(&attr) {
            log::warn!("ignoring unknown node attribute '{attr}' of graph {id}");
        }
        graphs.entry(id).or_default().insert(attr.to_string(), tensor);
    }
    Ok(graphs)
}

fn take_attr(attrs: &mut AttrMap, graph_id: u64, name: &str) -> GcnResult<Tensor> {
    attrs
        .remove(name)
        .ok_or_else(|| {
            GcnError::format(format!("graph {graph_id} is missing node attribute '{name}'"))
        })
}

fn rank1(t: &Tensor, name: &str) -> GcnResult<()> {
    if t.rank() != 1 {
        return Err(GcnError::format(format!("'{name}' must be rank 1, got {:?}", t.dims())));
    }
    Ok(())
}

/// ラベル・辺端点などの非負整数列を u32 として取り出す
fn index_values(t: &Tensor, name: &str) -> GcnResult<Vec<u32>> {
    rank1(t, name)?;
    match t.dtype() {
        DType::U32 => Ok(t.to_vec1::<u32>()?),
        DType::U8 => Ok(t.to_vec1::<u8>()?.into_iter().map(u32::from).collect()),
        DType::I64 => t
            .to_vec1::<i64>()?
            .into_iter()
            .map(|v| {
                u32::try_from(v)
                    .map_err(|_| {
                        GcnError::format(format!("'{name}' contains out-of-range value {v}"))
                    })
            })
            .collect(),
        other => Err(GcnError::format(format!("'{name}' has unsupported dtype {other:?}"))),
    }
}

fn mask_values(t: &Tensor, name: &str) -> GcnResult<Vec<bool>> {
    rank1(t, name)?;
    match t.dtype() {
        DType::U8 => Ok(t.to_vec1::<u8>()?.into_iter().map(|v| v != 0).collect()),
        DType::U32 => Ok(t.to_vec1::<u32>()?.into_iter().map(|v| v != 0).collect()),
        DType::I64 => Ok(t.to_vec1::<i64>()?.into_iter().map(|v| v != 0).collect()),
        other => Err(GcnError::format(format!("'{name}' has unsupported dtype {other:?}"))),
    }
}

fn check_len(name: &str, actual: usize, expected: usize) -> GcnResult<()> {
    if actual != expected {
        return Err(GcnError::format(format!(
            "'{name}' has {actual} entries, expected one per node ({expected})"
        )));
    }
    Ok(())
}

fn check_labels(labels: &[u32], num_classes: usize) -> GcnResult<()> {
    let Some(&max) = labels.iter().max() else {
        return Ok(());
    };
    if max as usize >= num_classes {
        return Err(GcnError::format(format!(
            "label {max} is out of range for {num_classes} classes"
        )));
    }
    if (max as usize) + 1 < num_classes {
        log::warn!(
            "labels use only {} of the {num_classes} configured classes",
            max as usize + 1
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_graph() -> GraphData {
        GraphData {
            num_nodes: 3,
            feat_dim: 2,
            feat: vec![1.0, 0.0, 0.0, 1.0, 0.5, 0.5],
            labels: vec![0, 1, 1],
            train_mask: vec![true, true, false],
            val_mask: vec![false, false, true],
            test_mask: vec![false, false, true],
            src: vec![0, 1, 2],
            dst: vec![1, 2, 0],
        }
    }

    #[test]
    fn test_load_single_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.safetensors");
        save_graph_collection(&path, &[tiny_graph()]).unwrap();

        let ctx = ExecutionContext::cpu(0);
        let ds = load_graph_collection(&path, 2, &ctx).unwrap();
        assert_eq!(ds.num_nodes(), 3);
        assert_eq!(ds.in_feats(), 2);
        assert_eq!(ds.graph.num_edges(), 3);
        assert_eq!(ds.labels.to_vec1::<u32>().unwrap(), vec![0, 1, 1]);
        assert_eq!(ds.train_mask.index().to_vec1::<u32>().unwrap(), vec![0, 1]);
        assert_eq!(ds.val_mask.len(), 1);

        let stats = ds.statistics();
        assert_eq!(stats.num_classes, 2);
        assert_eq!(stats.train_samples, 2);
        assert_eq!(stats.test_samples, 1);
    }

    #[test]
    fn test_rejects_zero_and_multiple_graphs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::cpu(0);

        let two = dir.path().join("two.safetensors");
        save_graph_collection(&two, &[tiny_graph(), tiny_graph()]).unwrap();
        let err = load_graph_collection(&two, 2, &ctx).unwrap_err();
        assert!(matches!(err, GcnError::DatasetFormat(_)), "{err}");

        let empty = dir.path().join("empty.safetensors");
        save_graph_collection(&empty, &[]).unwrap();
        let err = load_graph_collection(&empty, 2, &ctx).unwrap_err();
        assert!(matches!(err, GcnError::DatasetFormat(_)), "{err}");
    }

    #[test]
    fn test_rejects_missing_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.safetensors");
        let g = tiny_graph();
        let mut tensors = HashMap::new();
        tensors.insert(
            "0.feat".to_string(),
            Tensor::from_slice(&g.feat, (3, 2), &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let err = load_graph_collection(&path, 2, &ExecutionContext::cpu(0)).unwrap_err();
        match err {
            GcnError::DatasetFormat(msg) => assert!(msg.contains("label"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_label_beyond_class_count() {
        let ctx = ExecutionContext::cpu(0);
        let mut g = tiny_graph();
        g.labels = vec![0, 1, 5];
        let err = NodeDataset::from_graph_data(g, 2, &ctx).unwrap_err();
        assert!(matches!(err, GcnError::DatasetFormat(_)));
    }

    #[test]
    fn test_accepts_i64_labels() {
        let t = Tensor::new(&[0i64, 3, 46], &Device::Cpu).unwrap();
        assert_eq!(index_values(&t, "label").unwrap(), vec![0, 3, 46]);
        let neg = Tensor::new(&[-1i64], &Device::Cpu).unwrap();
        assert!(index_values(&neg, "label").is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let ctx = ExecutionContext::cpu(0);
        let err = load_graph_collection("/nonexistent/graph.safetensors", 2, &ctx)
            .unwrap_err();
        assert!(matches!(err, GcnError::Io(_)));
    }
}
