// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/bridge/frame.rs - 训练桥接消息帧
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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::BridgeError;

/// 指标名到数值，键使用驼峰命名
pub type Metrics = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Debug,
  Info,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
  /// 从 1 开始
  pub epoch: u32,
  pub total_epochs: u32,
  /// 当前 epoch 内的批次，从 1 开始
  pub batch: u32,
  pub total_batches: u32,
  pub global_batch: u64,
  pub global_total_batches: u64,
  pub progress: f64,
  pub metrics: Metrics,
}

/// 发往宿主的消息，每条一行 `{"type": ..., "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
  Log {
    level: LogLevel,
    text: String,
  },
  Progress(ProgressPayload),
  EpochEnd {
    epoch: u32,
    metrics: Metrics,
  },
  #[serde(rename_all = "camelCase")]
  Done {
    message: String,
    best_model: String,
    last_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<Metrics>,
  },
  Error {
    message: String,
    details: String,
  },
  Output {
    text: String,
  },
}

impl Outbound {
  pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
    Outbound::Log {
      level,
      text: text.into(),
    }
  }

  pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
    Outbound::Error {
      message: message.into(),
      details: details.into(),
    }
  }

  /// 编码为带换行的一行
  pub fn encode(&self) -> Result<String, BridgeError> {
    let mut line = serde_json::to_string(self)?;
    line.push('\n');
    Ok(line)
  }
}

fn default_epochs() -> u32 {
  100
}

fn default_batch() -> u32 {
  16
}

fn default_imgsz() -> u32 {
  640
}

fn default_lr0() -> f64 {
  0.01
}

fn default_auto() -> String {
  "auto".to_string()
}

fn default_augment() -> bool {
  true
}

fn default_patience() -> u32 {
  50
}

/// 训练超参数，缺省字段取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
  #[serde(default = "default_epochs")]
  pub epochs: u32,
  #[serde(default = "default_batch")]
  pub batch: u32,
  #[serde(default = "default_imgsz")]
  pub imgsz: u32,
  #[serde(default = "default_lr0")]
  pub lr0: f64,
  #[serde(default = "default_auto")]
  pub optimizer: String,
  #[serde(default = "default_augment")]
  pub augment: bool,
  #[serde(default = "default_patience")]
  pub patience: u32,
  #[serde(default = "default_auto")]
  pub device: String,
}

impl Default for TrainParams {
  fn default() -> Self {
    Self {
      epochs: default_epochs(),
      batch: default_batch(),
      imgsz: default_imgsz(),
      lr0: default_lr0(),
      optimizer: default_auto(),
      augment: default_augment(),
      patience: default_patience(),
      device: default_auto(),
    }
  }
}

/// `START_TRAIN` 携带的训练任务
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainConfig {
  pub dataset_path: String,
  pub output_path: String,
  pub model_path: String,
  #[serde(default)]
  pub params: TrainParams,
  #[serde(default)]
  pub dataset_info: Option<Value>,
}

/// 来自宿主的消息
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
  StartTrain(Box<TrainConfig>),
  StopTrain,
  Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
  #[serde(rename = "type", default)]
  kind: String,
  #[serde(default)]
  payload: Value,
}

impl Inbound {
  pub fn decode(line: &str) -> Result<Self, BridgeError> {
    let raw: RawFrame = serde_json::from_str(line)?;
    match raw.kind.as_str() {
      "START_TRAIN" => Ok(Inbound::StartTrain(Box::new(serde_json::from_value(
        raw.payload,
      )?))),
      "STOP_TRAIN" => Ok(Inbound::StopTrain),
      other => Ok(Inbound::Unknown(other.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn outbound_frames() {
    let frame = Outbound::log(LogLevel::Warning, "连接断开");
    assert_eq!(
      serde_json::to_value(&frame).unwrap(),
      json!({"type": "LOG", "payload": {"level": "warning", "text": "连接断开"}})
    );

    let frame = Outbound::EpochEnd {
      epoch: 3,
      metrics: Metrics::from([("mAP50".to_string(), 0.5)]),
    };
    assert_eq!(
      serde_json::to_value(&frame).unwrap(),
      json!({"type": "EPOCH_END", "payload": {"epoch": 3, "metrics": {"mAP50": 0.5}}})
    );

    let frame = Outbound::Done {
      message: "训练完成".to_string(),
      best_model: "train/weights/best.pt".to_string(),
      last_model: String::new(),
      metrics: None,
    };
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["type"], "DONE");
    assert_eq!(value["payload"]["bestModel"], "train/weights/best.pt");
    assert!(value["payload"].get("metrics").is_none());

    let line = Outbound::error("训练失败", "boom").encode().unwrap();
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1);
  }

  #[test]
  fn start_train_with_defaults() {
    let inbound = Inbound::decode(
      r#"{"type":"START_TRAIN","payload":{"datasetPath":"/d","outputPath":"/o","modelPath":"yolo.pt","params":{"epochs":3}}}"#,
    )
    .unwrap();
    let Inbound::StartTrain(config) = inbound else {
      panic!("expected START_TRAIN");
    };
    assert_eq!(config.dataset_path, "/d");
    assert_eq!(config.params.epochs, 3);
    assert_eq!(config.params.batch, 16);
    assert_eq!(config.params.imgsz, 640);
    assert_eq!(config.params.optimizer, "auto");
    assert!(config.params.augment);
    assert_eq!(config.params.patience, 50);
    assert!(config.dataset_info.is_none());
  }

  #[test]
  fn other_inbound_frames() {
    assert_eq!(
      Inbound::decode(r#"{"type":"STOP_TRAIN"}"#).unwrap(),
      Inbound::StopTrain
    );
    assert_eq!(
      Inbound::decode(r#"{"type":"PING","payload":{}}"#).unwrap(),
      Inbound::Unknown("PING".to_string())
    );
    assert!(Inbound::decode(r#"{"type":"START_TRAIN"}"#).is_err());
    assert!(Inbound::decode("not json").is_err());
  }
}
