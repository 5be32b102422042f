// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/bridge.rs - 训练插件与宿主之间的桥接
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
  #[error("连接宿主失败: {0}")]
  Connect(std::io::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("消息格式错误: {0}")]
  Codec(#[from] serde_json::Error),
  #[error("{0}")]
  Training(String),
}

mod client;
mod frame;
mod host;
mod progress;

pub use self::client::{BridgeClient, StopFlag};
pub use self::frame::{
  Inbound, LogLevel, Metrics, Outbound, ProgressPayload, TrainConfig, TrainParams,
};
pub use self::host::{TrainOutcome, Trainer, TrainingContext, TrainingHost};
pub use self::progress::{FALLBACK_BATCHES_PER_EPOCH, OutputForwarder, ProgressTracker};
