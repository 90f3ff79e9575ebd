//! GCN 学習用コマンドラインツールの共通部分

pub mod cli;
pub mod error_messages;
pub mod synthetic;
