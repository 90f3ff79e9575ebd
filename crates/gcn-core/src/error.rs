//! Error types for GCN training
//!
//! データセット読み込み・設定検証・テンソル演算の失敗をまとめて扱う。

/// GCN 学習で発生するエラー
#[derive(thiserror::Error, Debug)]
pub enum GcnError {
    /// シリアライズ済みグラフの形式が想定と異なる
    #[error("dataset format error: {0}")]
    DatasetFormat(String),

    /// 順伝播・逆伝播・オプティマイザ内部のテンソル演算エラー
    #[error("computation error: {0}")]
    Computation(#[from] candle_core::Error),

    /// 設定値の組み合わせが不正
    #[error("configuration error: {0}")]
    Configuration(String),

    /// マスクが 1 ノードも選択していない
    #[error("{0} mask selects no nodes")]
    EmptyMask(&'static str),

    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GcnError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        GcnError::DatasetFormat(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        GcnError::Configuration(msg.into())
    }
}

/// Result type for GCN operations
pub type GcnResult<T> = Result<T, GcnError>;
