//! オプティマイザ
//!
//! 勾配は candle の `backward()` が返す `GradStore` から受け取る。ステップごとに新しい
//! `GradStore` が作られるため、勾配のゼロクリアは不要。

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use crate::error::GcnResult;

/// オプティマイザ trait
pub trait Optimizer {
    /// パラメータを更新
    fn step(&mut self, grads: &GradStore) -> GcnResult<()>;

    /// 学習率を設定
    fn set_lr(&mut self, lr: f64);

    /// 現在の学習率を取得
    fn get_lr(&self) -> f64;

    /// 損失から勾配を計算して 1 ステップ更新する
    fn backward_step(&mut self, loss: &Tensor) -> GcnResult<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }
}

/// パラメータ 1 つ分のモーメント
struct AdamSlot {
    var: Var,
    /// 一次モーメント
    m: Tensor,
    /// 二次モーメント
    v: Tensor,
}

/// Adam オプティマイザ
///
/// 重み減衰は L2 正則化として勾配に `weight_decay * θ` を加える方式。
pub struct Adam {
    /// 学習率
    pub lr: f64,
    /// β1（一次モーメントの減衰率）
    pub beta1: f64,
    /// β2（二次モーメントの減衰率）
    pub beta2: f64,
    /// 数値安定性のための小さな値
    pub epsilon: f64,
    /// 重み減衰
    pub weight_decay: f64,

    /// ステップ数
    t: usize,
    slots: Vec<AdamSlot>,
}

impl Adam {
    /// 新しいAdamオプティマイザを作成
    pub fn new(vars: Vec<Var>, lr: f64) -> GcnResult<Self> {
        let slots = vars
            .into_iter()
            .map(|var| {
                let m = var.as_tensor().zeros_like()?;
                let v = var.as_tensor().zeros_like()?;
                Ok(AdamSlot { var, m, v })
            })
            .collect::<GcnResult<Vec<_>>>()?;
        Ok(Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            t: 0,
            slots,
        })
    }

    /// 重み減衰を設定
    pub fn with_weight_decay(mut self, wd: f64) -> Self {
        self.weight_decay = wd;
        self
    }

    /// β1を設定
    pub fn with_beta1(mut self, beta1: f64) -> Self {
        self.beta1 = beta1;
        self
    }

    /// β2を設定
    pub fn with_beta2(mut self, beta2: f64) -> Self {
        self.beta2 = beta2;
        self
    }

    /// これまでのステップ数
    pub fn steps(&self) -> usize {
        self.t
    }
}

/// Adamの更新式を 1 パラメータに適用
fn adam_update_param(
    slot: &mut AdamSlot,
    grad: &Tensor,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    lr_t: f64,
) -> candle_core::Result<()> {
    let theta = slot.var.as_tensor().detach();
    let grad = grad.detach();
    let g = if weight_decay != 0.0 { grad.add(&theta.affine(weight_decay, 0.0)?)? } else { grad };

    // モーメントの更新
    slot.m = slot.m.affine(beta1, 0.0)?.add(&g.affine(1.0 - beta1, 0.0)?)?;
    slot.v = slot.v.affine(beta2, 0.0)?.add(&g.sqr()?.affine(1.0 - beta2, 0.0)?)?;

    // パラメータの更新
    let update = slot.m.div(&slot.v.sqrt()?.affine(1.0, epsilon)?)?.affine(lr_t, 0.0)?;
    slot.var.set(&theta.sub(&update)?)
}

impl Optimizer for Adam {
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn get_lr(&self) -> f64 {
        self.lr
    }

    fn step(&mut self, grads: &GradStore) -> GcnResult<()> {
        self.t += 1;

        // バイアス補正付き学習率
        let lr_t = self.lr * (1.0 - self.beta2.powi(self.t as i32)).sqrt()
            / (1.0 - self.beta1.powi(self.t as i32));

        for slot in &mut self.slots {
            // 損失に寄与しないパラメータは更新しない
            let Some(grad) = grads.get(slot.var.as_tensor()) else {
                continue;
            };
            adam_update_param(
                slot,
                grad,
                self.beta1,
                self.beta2,
                self.epsilon,
                self.weight_decay,
                lr_t,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_adam_step_moves_against_gradient() {
        let x = Var::new(&[1.0f32, -1.0], &Device::Cpu).unwrap();
        let mut optimizer = Adam::new(vec![x.clone()], 0.1).unwrap();

        // loss = Σ x²  →  grad = 2x
        let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
        optimizer.backward_step(&loss).unwrap();

        let after = x.as_tensor().to_vec1::<f32>().unwrap();
        assert!(after[0] < 1.0);
        assert!(after[1] > -1.0);
        // 初回ステップの移動量はほぼ学習率に等しい
        assert!((after[0] - 0.9).abs() < 1e-4);
        assert_eq!(optimizer.steps(), 1);
    }

    #[test]
    fn test_weight_decay_shrinks_parameters_with_zero_gradient() {
        let x = Var::new(&[2.0f32, -2.0], &Device::Cpu).unwrap();
        let mut optimizer = Adam::new(vec![x.clone()], 0.01).unwrap().with_weight_decay(0.1);

        // x を計算グラフに残したまま勾配を 0 にする
        let zeros = x.as_tensor().zeros_like().unwrap();
        let loss = x.as_tensor().mul(&zeros).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads.get(x.as_tensor()).expect("x keeps a gradient entry");
        assert_eq!(grad.to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
        optimizer.step(&grads).unwrap();

        let after = x.as_tensor().to_vec1::<f32>().unwrap();
        assert!(after[0] < 2.0 && after[0] > 0.0);
        assert!(after[1] > -2.0 && after[1] < 0.0);
    }

    #[test]
    fn test_unused_parameter_is_left_alone() {
        let used = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let unused = Var::new(&[5.0f32], &Device::Cpu).unwrap();
        let mut optimizer =
            Adam::new(vec![used.clone(), unused.clone()], 0.1).unwrap().with_weight_decay(0.5);

        let loss = used.as_tensor().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        assert!(grads.get(unused.as_tensor()).is_none());
        optimizer.step(&grads).unwrap();

        // 勾配のないパラメータは重み減衰も適用されない
        assert_eq!(unused.as_tensor().to_vec1::<f32>().unwrap(), vec![5.0]);
        assert!(used.as_tensor().to_vec1::<f32>().unwrap()[0] < 1.0);
    }

    #[test]
    fn test_set_lr() {
        let x = Var::new(&[0.0f32], &Device::Cpu).unwrap();
        let mut optimizer = Adam::new(vec![x], 0.01).unwrap().with_beta1(0.8).with_beta2(0.99);
        optimizer.set_lr(0.5);
        assert_eq!(optimizer.get_lr(), 0.5);
        assert_eq!(optimizer.beta1, 0.8);
    }
}
