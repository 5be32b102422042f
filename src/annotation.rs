// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/annotation.rs - 标注结果定义
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

use clap::ValueEnum;
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};

use crate::geometry::{BoundingBox, Point, Suppressible, Visibility};

/// 输出几何类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
  #[serde(alias = "bbox")]
  Rect,
  Polygon,
}

/// 归一化关键点，序列化为 `[x, y, v]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint(pub f32, pub f32, pub Visibility);

/// 矩形标注数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RectData {
  #[serde(flatten)]
  pub bbox: BoundingBox,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub keypoints: Option<Vec<Keypoint>>,
}

/// 多边形标注数据，末点隐式连接首点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonData {
  pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
  Rect(RectData),
  Polygon(PolygonData),
}

/// 单个标注，随推理响应一起返回，不做持久化
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub shape: Shape,
  pub category_name: String,
  pub confidence: f32,
}

impl Annotation {
  pub fn rect(bbox: BoundingBox, category_name: impl Into<String>, confidence: f32) -> Self {
    Self {
      shape: Shape::Rect(RectData {
        bbox,
        keypoints: None,
      }),
      category_name: category_name.into(),
      confidence,
    }
  }

  pub fn polygon(points: Vec<Point>, category_name: impl Into<String>, confidence: f32) -> Self {
    Self {
      shape: Shape::Polygon(PolygonData { points }),
      category_name: category_name.into(),
      confidence,
    }
  }

  pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
    if let Shape::Rect(rect) = &mut self.shape {
      rect.keypoints = Some(keypoints);
    }
    self
  }

  pub fn kind(&self) -> OutputKind {
    match self.shape {
      Shape::Rect(_) => OutputKind::Rect,
      Shape::Polygon(_) => OutputKind::Polygon,
    }
  }

  /// 轴对齐外接框；多边形取其顶点外接矩形
  pub fn bounding_box(&self) -> BoundingBox {
    match &self.shape {
      Shape::Rect(rect) => rect.bbox,
      Shape::Polygon(polygon) => BoundingBox::enclosing(&polygon.points).unwrap_or_default(),
    }
  }
}

impl Suppressible for Annotation {
  fn confidence(&self) -> f32 {
    self.confidence
  }

  fn bounding_box(&self) -> BoundingBox {
    Annotation::bounding_box(self)
  }
}

impl Serialize for Annotation {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(4))?;
    match &self.shape {
      Shape::Rect(rect) => {
        map.serialize_entry("type", "rect")?;
        map.serialize_entry("categoryName", &self.category_name)?;
        map.serialize_entry("confidence", &self.confidence)?;
        map.serialize_entry("data", rect)?;
      }
      Shape::Polygon(polygon) => {
        map.serialize_entry("type", "polygon")?;
        map.serialize_entry("categoryName", &self.category_name)?;
        map.serialize_entry("confidence", &self.confidence)?;
        map.serialize_entry("data", polygon)?;
      }
    }
    map.end()
  }
}
