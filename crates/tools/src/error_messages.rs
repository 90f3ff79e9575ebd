// Common error messages for train_gcn

/// 構造化ログの出力先を開けなかった場合の警告
pub const WARN_STRUCTURED_LOG_OPEN: &str = "failed to open structured log";

/// `--self-loop` を受け付けるが適用しない場合の警告
pub const WARN_SELF_LOOP_IGNORED: &str =
    "--self-loop is accepted but not applied; the graph is used as stored";

/// データセット読み込み失敗時の文脈
pub const ERR_DATASET_LOAD: &str = "failed to load dataset";

/// 設定検証失敗時の文脈
pub const ERR_INVALID_CONFIG: &str = "invalid training configuration";
