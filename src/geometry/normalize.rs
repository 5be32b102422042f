// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/geometry/normalize.rs - 像素坐标与归一化坐标转换
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

use serde::{Serialize, Serializer};

use crate::geometry::{BoundingBox, PixelBox, Point};

/// 关键点置信度高于该值视为可见
const KEYPOINT_VISIBLE_CONFIDENCE: f32 = 0.5;

/// 图像尺寸，同时负责坐标归一化与反归一化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

// 零尺寸时返回 0，避免产生 inf/NaN
fn scale_down(value: f32, extent: u32) -> f32 {
  if extent == 0 {
    0.0
  } else {
    value / extent as f32
  }
}

impl ImageSize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// 像素坐标 -> 归一化坐标
  pub fn normalize_point(&self, p: Point) -> Point {
    Point::new(scale_down(p.x, self.width), scale_down(p.y, self.height))
  }

  /// 归一化坐标 -> 像素坐标
  pub fn denormalize_point(&self, p: Point) -> Point {
    Point::new(p.x * self.width as f32, p.y * self.height as f32)
  }

  /// 像素边界框 -> 归一化边界框
  pub fn normalize_box(&self, b: &PixelBox) -> BoundingBox {
    BoundingBox::new(
      scale_down(b.x1, self.width),
      scale_down(b.y1, self.height),
      scale_down(b.x2 - b.x1, self.width),
      scale_down(b.y2 - b.y1, self.height),
    )
  }

  /// 归一化边界框 -> 像素边界框
  pub fn denormalize_box(&self, b: &BoundingBox) -> PixelBox {
    let (w, h) = (self.width as f32, self.height as f32);
    PixelBox::new(b.x * w, b.y * h, b.right() * w, b.bottom() * h)
  }
}

/// 关键点可见性，数值与 COCO 约定一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  NotVisible = 0,
  Occluded = 1,
  Visible = 2,
}

impl Serialize for Visibility {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(*self as u8)
  }
}

/// 推断关键点可见性
///
/// 有置信度时按阈值判断；没有置信度时，仅当像素坐标均为正才视为可见。
pub fn keypoint_visibility(x: f32, y: f32, confidence: Option<f32>) -> Visibility {
  match confidence {
    Some(c) if c > KEYPOINT_VISIBLE_CONFIDENCE => Visibility::Visible,
    Some(_) => Visibility::Occluded,
    None if x > 0.0 && y > 0.0 => Visibility::Visible,
    None => Visibility::NotVisible,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  #[test]
  fn point_round_trip() {
    let size = ImageSize::new(1920, 1080);
    let p = Point::new(123.5, 987.25);
    let back = size.denormalize_point(size.normalize_point(p));
    assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-3);
    assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-3);
  }

  #[test]
  fn box_round_trip_keeps_extent() {
    let size = ImageSize::new(640, 480);
    let pixel = PixelBox::new(64.0, 48.0, 320.0, 240.0);
    let norm = size.normalize_box(&pixel);
    assert_abs_diff_eq!(norm.x, 0.1, epsilon = 1e-6);
    assert_abs_diff_eq!(norm.y, 0.1, epsilon = 1e-6);
    assert_abs_diff_eq!(norm.width, 0.4, epsilon = 1e-6);
    assert_abs_diff_eq!(norm.height, 0.4, epsilon = 1e-6);

    let back = size.denormalize_box(&norm);
    assert_abs_diff_eq!(back.x1, 64.0, epsilon = 1e-3);
    assert_abs_diff_eq!(back.y2, 240.0, epsilon = 1e-3);
  }

  #[test]
  fn zero_extent_does_not_divide() {
    let size = ImageSize::new(0, 10);
    let p = size.normalize_point(Point::new(5.0, 5.0));
    assert_eq!(p.x, 0.0);
    assert_eq!(p.y, 0.5);
    assert!(size.is_empty());
  }

  #[test]
  fn visibility_rules() {
    assert_eq!(keypoint_visibility(1.0, 1.0, Some(0.9)), Visibility::Visible);
    assert_eq!(keypoint_visibility(1.0, 1.0, Some(0.5)), Visibility::Occluded);
    assert_eq!(keypoint_visibility(3.0, 4.0, None), Visibility::Visible);
    assert_eq!(keypoint_visibility(0.0, 4.0, None), Visibility::NotVisible);
    assert_eq!(serde_json::to_string(&Visibility::Visible).unwrap(), "2");
  }
}
