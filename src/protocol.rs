// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/protocol.rs - 标准输入输出上的行式 JSON 协议
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

use std::io::Write;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
  annotation::{Annotation, OutputKind},
  backend::{Prompt, PromptPoint},
  geometry::{BoundingBox, ImageSize, Point},
  postprocess::AnnotateOptions,
};

#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("Invalid JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Request is not a JSON object")]
  NotAnObject,
  #[error("Invalid parameters: {0}")]
  Params(serde_json::Error),
}

/// 单行请求，其余顶层字段作为参数
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
  #[serde(default)]
  pub request_id: String,
  #[serde(default)]
  pub cmd: String,
  #[serde(flatten)]
  pub params: Map<String, Value>,
}

impl Request {
  pub fn parse(line: &str) -> Result<Self, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    if !value.is_object() {
      return Err(ProtocolError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
  }

  pub fn params<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(self.params.clone())).map_err(ProtocolError::Params)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  LoadModel,
  SetImage,
  Infer,
  Unload,
  Shutdown,
}

impl Command {
  pub fn parse(cmd: &str) -> Option<Self> {
    match cmd {
      "load_model" => Some(Command::LoadModel),
      "set_image" => Some(Command::SetImage),
      "infer" => Some(Command::Infer),
      "unload" => Some(Command::Unload),
      "shutdown" => Some(Command::Shutdown),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Command::LoadModel => "load_model",
      Command::SetImage => "set_image",
      Command::Infer => "infer",
      Command::Unload => "unload",
      Command::Shutdown => "shutdown",
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadModelParams {
  #[serde(default)]
  pub weights: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetImageParams {
  #[serde(default)]
  pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointParam {
  pub x: f32,
  pub y: f32,
  /// 只有 "positive" 是正样本点
  #[serde(default, rename = "type")]
  pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferParams {
  #[serde(default)]
  pub points: Option<Vec<PointParam>>,
  #[serde(default, rename = "box", alias = "bbox")]
  pub bbox: Option<BoundingBox>,
  #[serde(default)]
  pub output_type: Option<OutputKind>,
  #[serde(default)]
  pub multimask: Option<bool>,
  #[serde(default)]
  pub conf: Option<f32>,
  #[serde(default)]
  pub iou: Option<f32>,
  #[serde(default)]
  pub max_points: Option<usize>,
}

impl InferParams {
  pub fn prompt(&self, options: &AnnotateOptions) -> Prompt {
    let points = self
      .points
      .iter()
      .flatten()
      .map(|p| PromptPoint {
        point: Point::new(p.x, p.y),
        positive: p.kind.as_deref() == Some("positive"),
      })
      .collect();
    Prompt {
      points,
      bbox: self
        .bbox
        .map(|b| BoundingBox::new(b.x, b.y, b.width, b.height)),
      multimask: options.multimask,
      confidence: options.min_confidence,
    }
  }

  /// 用请求中的字段覆盖默认选项
  pub fn options(&self, defaults: &AnnotateOptions) -> AnnotateOptions {
    let mut options = defaults.clone();
    if let Some(output) = self.output_type {
      options.output = output;
    }
    if let Some(multimask) = self.multimask {
      options.multimask = multimask;
    }
    if let Some(iou) = self.iou {
      options.iou_threshold = iou;
    }
    if let Some(conf) = self.conf {
      options.min_confidence = Some(conf);
    }
    if let Some(max_points) = self.max_points {
      options.vertex_budget = max_points;
    }
    options
  }
}

/// 成功响应携带的数据，平铺到响应对象顶层
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
  #[serde(rename_all = "camelCase")]
  ModelLoaded { model_path: String, device: String },
  #[serde(rename_all = "camelCase")]
  ImageSet {
    image_path: String,
    image_size: ImageSize,
  },
  #[serde(rename_all = "camelCase")]
  Inferred {
    annotations: Vec<Annotation>,
    infer_time_ms: f64,
  },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub request_id: String,
  pub cmd: String,
  pub success: bool,
  pub error: Option<String>,
  #[serde(flatten, skip_serializing_if = "Option::is_none")]
  pub payload: Option<Payload>,
}

impl Response {
  pub fn ok(request: &Request, payload: Option<Payload>) -> Self {
    Self {
      request_id: request.request_id.clone(),
      cmd: request.cmd.clone(),
      success: true,
      error: None,
      payload,
    }
  }

  pub fn err(request: &Request, error: impl Into<String>) -> Self {
    Self {
      request_id: request.request_id.clone(),
      cmd: request.cmd.clone(),
      success: false,
      error: Some(error.into()),
      payload: None,
    }
  }
}

/// 写出一行响应并立即刷新
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> std::io::Result<()> {
  serde_json::to_writer(&mut *writer, response)?;
  writer.write_all(b"\n")?;
  writer.flush()
}
