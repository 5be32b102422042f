// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/backend.rs - 推理后端抽象
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::{
  geometry::{BoundingBox, ImageSize, PixelBox, Point},
  postprocess::Mask,
};

/// 缺少 VC++ 运行库时给用户的提示
pub const VC_REDIST_REMEDIATION: &str = "Missing Microsoft Visual C++ Redistributable. Please download and install from: https://aka.ms/vs/17/release/vc_redist.x64.exe";

// 原生运行库加载失败的特征串
const MISSING_RUNTIME_MARKERS: [&str; 2] = ["c10.dll", "WinError 126"];

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("{0}")]
  Unavailable(String),
  #[error("Failed to load model: {0}")]
  Load(String),
  #[error("Inference failed: {0}")]
  Inference(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

fn is_missing_runtime(raw: &str) -> bool {
  MISSING_RUNTIME_MARKERS.iter().any(|m| raw.contains(m))
}

impl BackendError {
  /// 将原生运行库的报错转换为可操作的提示
  ///
  /// 供依赖原生运行库的后端在初始化失败时使用。
  pub fn from_runtime_failure(raw: &str) -> Self {
    if is_missing_runtime(raw) {
      BackendError::Unavailable(VC_REDIST_REMEDIATION.to_string())
    } else {
      BackendError::Unavailable(format!("System error: {}", raw))
    }
  }

  /// 加载失败中带有缺失运行库特征的，改写为 `Unavailable`，其余保持不变
  pub fn into_actionable(self) -> Self {
    let raw = match &self {
      BackendError::Load(msg) => msg.clone(),
      BackendError::Io(e) => e.to_string(),
      _ => return self,
    };
    if is_missing_runtime(&raw) {
      Self::from_runtime_failure(&raw)
    } else {
      self
    }
  }
}

/// 提示点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromptPoint {
  pub point: Point,
  pub positive: bool,
}

/// 归一化坐标下的推理提示
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
  pub points: Vec<PromptPoint>,
  pub bbox: Option<BoundingBox>,
  pub multimask: bool,
  /// 置信度下限，同时转交给后端
  pub confidence: Option<f32>,
}

impl Prompt {
  pub fn is_empty(&self) -> bool {
    self.points.is_empty() && self.bbox.is_none()
  }

  /// 转换为像素坐标，框变为 `[x1, y1, x2, y2]`
  pub fn to_pixels(&self, size: ImageSize) -> PixelPrompt {
    PixelPrompt {
      points: self
        .points
        .iter()
        .map(|p| PromptPoint {
          point: size.denormalize_point(p.point),
          positive: p.positive,
        })
        .collect(),
      bbox: self.bbox.as_ref().map(|b| size.denormalize_box(b)),
      multimask: self.multimask,
      confidence: self.confidence,
    }
  }
}

/// 像素坐标下的推理提示，交给后端使用
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelPrompt {
  pub points: Vec<PromptPoint>,
  pub bbox: Option<PixelBox>,
  pub multimask: bool,
  pub confidence: Option<f32>,
}

impl PixelPrompt {
  pub fn is_empty(&self) -> bool {
    self.points.is_empty() && self.bbox.is_none()
  }

  pub fn positives(&self) -> impl Iterator<Item = Point> + '_ {
    self.points.iter().filter(|p| p.positive).map(|p| p.point)
  }

  pub fn negatives(&self) -> impl Iterator<Item = Point> + '_ {
    self.points.iter().filter(|p| !p.positive).map(|p| p.point)
  }
}

/// 后端给出的单个检测，坐标为像素
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub bbox: Option<PixelBox>,
  pub score: f32,
  pub class_name: Option<String>,
}

impl RawDetection {
  pub fn new(bbox: Option<PixelBox>, score: f32) -> Self {
    Self {
      bbox,
      score,
      class_name: None,
    }
  }

  pub fn with_class(mut self, name: impl Into<String>) -> Self {
    self.class_name = Some(name.into());
    self
  }
}

/// 像素坐标关键点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawKeypoint {
  pub x: f32,
  pub y: f32,
  pub confidence: Option<f32>,
}

/// 后端原始输出
#[derive(Debug, Clone)]
pub enum BackendOutput {
  Detections(Vec<RawDetection>),
  DetectionsWithMasks(Vec<(RawDetection, Mask)>),
  DetectionsWithKeypoints(Vec<(RawDetection, Option<Vec<RawKeypoint>>)>),
}

impl BackendOutput {
  pub fn len(&self) -> usize {
    match self {
      BackendOutput::Detections(d) => d.len(),
      BackendOutput::DetectionsWithMasks(d) => d.len(),
      BackendOutput::DetectionsWithKeypoints(d) => d.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 已加载的推理后端
pub trait InferenceBackend {
  /// 运行设备描述
  fn device(&self) -> &str;

  /// 设置当前图像，可在此预计算图像特征
  fn set_image(&mut self, image: &RgbImage) -> Result<(), BackendError>;

  fn predict(&mut self, prompt: &PixelPrompt) -> Result<BackendOutput, BackendError>;
}

/// 后端加载器
pub trait BackendLoader {
  fn load(&self, weights: &Path) -> Result<Box<dyn InferenceBackend>, BackendError>;
}

mod classic;

pub use self::classic::{ClassicLoader, ClassicParams, ClassicSegmenter};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_runtime_maps_to_remediation() {
    let err = BackendError::from_runtime_failure("OSError: [WinError 126] ... c10.dll");
    assert_eq!(err.to_string(), VC_REDIST_REMEDIATION);
    let err = BackendError::from_runtime_failure("segfault in kernel");
    assert_eq!(err.to_string(), "System error: segfault in kernel");
  }

  #[test]
  fn prompt_to_pixels() {
    let prompt = Prompt {
      points: vec![PromptPoint {
        point: Point::new(0.5, 0.25),
        positive: true,
      }],
      bbox: Some(BoundingBox::new(0.1, 0.2, 0.5, 0.5)),
      multimask: true,
      confidence: None,
    };
    let pixel = prompt.to_pixels(ImageSize::new(200, 100));
    assert_eq!(pixel.points[0].point, Point::new(100.0, 25.0));
    let bbox = pixel.bbox.unwrap();
    assert!((bbox.x1 - 20.0).abs() < 1e-4);
    assert!((bbox.y1 - 20.0).abs() < 1e-4);
    assert!((bbox.x2 - 120.0).abs() < 1e-4);
    assert!((bbox.y2 - 70.0).abs() < 1e-4);
    assert_eq!(pixel.positives().count(), 1);
    assert_eq!(pixel.negatives().count(), 0);
    assert!(Prompt::default().is_empty());
  }
}
