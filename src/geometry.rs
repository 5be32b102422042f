// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/geometry.rs - 几何基础类型
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

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 二维点，归一化坐标或像素坐标均可
///
/// 在协议中序列化为 `[x, y]`。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

impl Serialize for Point {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    [self.x, self.y].serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Point {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let [x, y] = <[f32; 2]>::deserialize(deserializer)?;
    Ok(Point { x, y })
  }
}

/// 轴对齐边界框，左上角为原点，宽高非负
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  /// 创建边界框，负的宽高会被截断为 0
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width: width.max(0.0),
      height: height.max(0.0),
    }
  }

  /// 由左上角与右下角坐标创建
  pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self::new(x1, y1, x2 - x1, y2 - y1)
  }

  /// 点集的外接矩形，空点集返回 None
  pub fn enclosing(points: &[Point]) -> Option<Self> {
    let first = points.first()?;
    let (mut x_min, mut y_min, mut x_max, mut y_max) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
      x_min = x_min.min(p.x);
      y_min = y_min.min(p.y);
      x_max = x_max.max(p.x);
      y_max = y_max.max(p.y);
    }
    Some(Self::from_corners(x_min, y_min, x_max, y_max))
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }
}

/// 像素空间中的 `[x_min, y_min, x_max, y_max]` 边界框
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl PixelBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  pub fn center(&self) -> Point {
    Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
  }
}

mod nms;
mod normalize;

pub use self::nms::{DEFAULT_IOU_THRESHOLD, Suppressible, iou, nms};
pub use self::normalize::{ImageSize, Visibility, keypoint_visibility};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_extent_is_clamped() {
    let b = BoundingBox::from_corners(0.5, 0.5, 0.25, 0.75);
    assert_eq!(b.width, 0.0);
    assert_eq!(b.height, 0.25);
  }

  #[test]
  fn enclosing_box_of_points() {
    let points = [
      Point::new(0.2, 0.4),
      Point::new(0.6, 0.1),
      Point::new(0.3, 0.9),
    ];
    let b = BoundingBox::enclosing(&points).unwrap();
    assert_eq!(b.x, 0.2);
    assert_eq!(b.y, 0.1);
    assert!((b.right() - 0.6).abs() < 1e-6);
    assert!((b.bottom() - 0.9).abs() < 1e-6);
    assert!(BoundingBox::enclosing(&[]).is_none());
  }

  #[test]
  fn point_serializes_as_pair() {
    let json = serde_json::to_string(&Point::new(0.5, 0.25)).unwrap();
    assert_eq!(json, "[0.5,0.25]");
    let back: Point = serde_json::from_str("[0.125,1.0]").unwrap();
    assert_eq!(back, Point::new(0.125, 1.0));
  }
}
