//! 分類精度の評価

use candle_core::{D, DType, Tensor};

use crate::dataset::Mask;
use crate::error::{GcnError, GcnResult};
use crate::model::NodeClassifier;

/// マスクで選んだノードについて argmax 予測とラベルの一致率を計算する
pub fn accuracy(logits: &Tensor, labels: &Tensor, mask: &Mask) -> GcnResult<f64> {
    if mask.is_empty() {
        return Err(GcnError::EmptyMask(mask.name()));
    }
    let predicted = logits.index_select(mask.index(), 0)?.argmax(D::Minus1)?;
    let expected = labels.index_select(mask.index(), 0)?;
    let correct = predicted.eq(&expected)?.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?;
    Ok(correct / mask.len() as f64)
}

/// 推論モードでモデルを評価する
///
/// 呼び出し前のモードは戻り値を返す時点で復元される。
pub fn evaluate<M: NodeClassifier + ?Sized>(
    model: &mut M,
    features: &Tensor,
    labels: &Tensor,
    mask: &Mask,
) -> GcnResult<f64> {
    if mask.is_empty() {
        return Err(GcnError::EmptyMask(mask.name()));
    }
    let mut scope = model.eval_scope();
    let logits = scope.forward(features)?;
    accuracy(&logits, labels, mask)
}
