//! 実行コンテキスト
//!
//! デバイス選択と乱数シードをプロセス全体の状態ではなく値として持ち回る。

use candle_core::Device;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{GcnError, GcnResult};

/// 乱数ストリームの用途別 ID
pub(crate) const STREAM_INIT: u64 = 0;
pub(crate) const STREAM_DROPOUT: u64 = 1;

/// テンソルの配置先と乱数シード
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    device: Device,
    seed: u64,
}

impl ExecutionContext {
    /// CPU 上で実行するコンテキスト
    pub fn cpu(seed: u64) -> Self {
        Self { device: Device::Cpu, seed }
    }

    /// `--gpu` 相当の指定からコンテキストを作る
    ///
    /// 負の値は CPU。CUDA 非対応ビルドで 0 以上が指定された場合は警告して CPU に落とす。
    pub fn from_gpu_index(gpu: i32, seed: u64) -> GcnResult<Self> {
        if gpu < 0 {
            return Ok(Self::cpu(seed));
        }
        if !candle_core::utils::cuda_is_available() {
            log::warn!("CUDA support is not compiled in; --gpu {gpu} falls back to CPU");
            return Ok(Self::cpu(seed));
        }
        let device = Device::new_cuda(gpu as usize)
            .map_err(|e| GcnError::config(format!("cannot open CUDA device {gpu}: {e}")))?;
        Ok(Self { device, seed })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// 用途ごとに独立したストリームの乱数生成器を返す
    pub fn rng(&self, stream: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);
        rng
    }
}
