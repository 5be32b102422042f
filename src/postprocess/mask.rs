// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/postprocess/mask.rs - 掩码转多边形/矩形
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

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
  contours::{BorderType, find_contours},
  distance_transform::Norm,
  geometry::{approximate_polygon_dp, arc_length},
  morphology::close,
  point::Point as PixelPoint,
};
use tracing::debug;

use crate::{
  annotation::{Annotation, OutputKind},
  geometry::{BoundingBox, ImageSize, PixelBox, Point},
};

/// 多边形默认最大顶点数
pub const DEFAULT_VERTEX_BUDGET: usize = 256;
/// 有效多边形的最少顶点数
pub const MIN_VERTICES: usize = 3;
/// 概率掩码二值化阈值，低于 0.5 以便保留更多边缘像素
pub const PROBABILITY_THRESHOLD: f32 = 0.4;

// 平滑与闭运算所需的最小边长
const MIN_KERNEL_EXTENT: u32 = 3;
const INITIAL_EPSILON_RATIO: f64 = 0.001;
const MAX_EPSILON_RATIO: f64 = 0.1;
const EPSILON_GROWTH: f64 = 1.5;

const FOREGROUND: Luma<u8> = Luma([255]);
const BACKGROUND: Luma<u8> = Luma([0]);

/// 模型输出的原始掩码
#[derive(Debug, Clone)]
pub enum Mask {
  /// 概率掩码，取值范围 [0, 1]
  Probability(ImageBuffer<Luma<f32>, Vec<f32>>),
  /// 二值掩码，非零即前景
  Binary(GrayImage),
}

impl Mask {
  /// 由浮点数据构建掩码
  ///
  /// 最大值不超过 1.0 视为概率掩码，否则按非零为前景的二值掩码处理。
  /// 数据长度与尺寸不符时返回 None。
  pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Option<Self> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(width, height, values)?;
    if max <= 1.0 {
      return Some(Mask::Probability(buffer));
    }
    Some(Mask::Binary(GrayImage::from_fn(width, height, |x, y| {
      if buffer.get_pixel(x, y)[0] > 0.0 {
        FOREGROUND
      } else {
        BACKGROUND
      }
    })))
  }

  pub fn dimensions(&self) -> (u32, u32) {
    match self {
      Mask::Probability(m) => m.dimensions(),
      Mask::Binary(m) => m.dimensions(),
    }
  }

  pub fn is_probability(&self) -> bool {
    matches!(self, Mask::Probability(_))
  }

  /// 二值化为 0/255 灰度图
  pub fn binarize(&self) -> GrayImage {
    let (w, h) = self.dimensions();
    match self {
      Mask::Binary(m) => GrayImage::from_fn(w, h, |x, y| {
        if m.get_pixel(x, y)[0] > 0 {
          FOREGROUND
        } else {
          BACKGROUND
        }
      }),
      Mask::Probability(m) if w >= MIN_KERNEL_EXTENT && h >= MIN_KERNEL_EXTENT => {
        let smoothed = mean3x3(m);
        GrayImage::from_fn(w, h, |x, y| {
          if smoothed.get_pixel(x, y)[0] >= PROBABILITY_THRESHOLD {
            FOREGROUND
          } else {
            BACKGROUND
          }
        })
      }
      Mask::Probability(m) => GrayImage::from_fn(w, h, |x, y| {
        if m.get_pixel(x, y)[0] >= PROBABILITY_THRESHOLD {
          FOREGROUND
        } else {
          BACKGROUND
        }
      }),
    }
  }
}

/// 3x3 邻域均值，边界按最近像素延拓，保持浮点精度
fn mean3x3(m: &ImageBuffer<Luma<f32>, Vec<f32>>) -> ImageBuffer<Luma<f32>, Vec<f32>> {
  let (w, h) = m.dimensions();
  ImageBuffer::from_fn(w, h, |x, y| {
    let mut sum = 0.0;
    for dy in -1i64..=1 {
      for dx in -1i64..=1 {
        let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
        let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
        sum += m.get_pixel(sx, sy)[0];
      }
    }
    Luma([sum / 9.0])
  })
}

/// 将掩码转换为标注
///
/// 只保留面积最大的外轮廓；掩码中没有可用轮廓或简化后不足三个顶点时返回 None，
/// 调用方应将其视为“该掩码未检测到目标”，而不是错误。
pub fn mask_to_annotation(
  mask: &Mask,
  size: ImageSize,
  kind: OutputKind,
  vertex_budget: usize,
  confidence: f32,
  category_name: &str,
) -> Option<Annotation> {
  let (w, h) = mask.dimensions();
  if w == 0 || h == 0 || size.is_empty() {
    debug!("掩码或图像尺寸为空: 掩码 {}x{}, 图像 {:?}", w, h, size);
    return None;
  }

  let mut binary = mask.binarize();
  if w >= MIN_KERNEL_EXTENT && h >= MIN_KERNEL_EXTENT {
    // 闭运算填补细小空洞与缝隙
    binary = close(&binary, Norm::LInf, 1);
  }

  let Some(contour) = largest_external_contour(&binary) else {
    debug!("掩码中未找到轮廓");
    return None;
  };

  let vertices = simplify_contour(&contour, vertex_budget);
  if vertices.len() < MIN_VERTICES {
    debug!("简化后顶点不足: {}", vertices.len());
    return None;
  }
  debug!("轮廓点数 {} -> 简化后 {}", contour.len(), vertices.len());

  let points: Vec<Point> = vertices
    .iter()
    .map(|p| Point::new(p.x as f32, p.y as f32))
    .collect();

  match kind {
    OutputKind::Rect => {
      let bbox = BoundingBox::enclosing(&points)?;
      let pixel = PixelBox::new(bbox.x, bbox.y, bbox.right(), bbox.bottom());
      Some(Annotation::rect(
        size.normalize_box(&pixel),
        category_name,
        confidence,
      ))
    }
    OutputKind::Polygon => Some(Annotation::polygon(
      points.into_iter().map(|p| size.normalize_point(p)).collect(),
      category_name,
      confidence,
    )),
  }
}

/// 逐步放宽精度的多边形近似
///
/// 初始 epsilon 为周长的 0.001 倍，顶点数超过上限时每次乘以 1.5，
/// 直到 epsilon 达到周长的 0.1 倍；仍超过上限则均匀抽稀到上限。
pub fn simplify_contour(
  contour: &[PixelPoint<i32>],
  vertex_budget: usize,
) -> Vec<PixelPoint<i32>> {
  let budget = vertex_budget.max(MIN_VERTICES);
  if contour.len() < MIN_VERTICES {
    return contour.to_vec();
  }

  let perimeter = arc_length(contour, true);
  if perimeter <= 0.0 {
    return Vec::new();
  }

  let mut epsilon = INITIAL_EPSILON_RATIO * perimeter;
  let mut approx = approximate_closed(contour, epsilon);
  while approx.len() > budget && epsilon < MAX_EPSILON_RATIO * perimeter {
    epsilon *= EPSILON_GROWTH;
    approx = approximate_closed(contour, epsilon);
  }

  if approx.len() > budget {
    debug!("近似后顶点数 {} 仍超过上限 {}，均匀抽稀", approx.len(), budget);
    let len = approx.len();
    approx = (0..budget).map(|i| approx[i * len / budget]).collect();
  }

  approx
}

// 闭合曲线近似，去掉末尾重复的首点
fn approximate_closed(contour: &[PixelPoint<i32>], epsilon: f64) -> Vec<PixelPoint<i32>> {
  let mut approx = approximate_polygon_dp(contour, epsilon, true);
  while approx.len() > 1 && approx.last() == approx.first() {
    approx.pop();
  }
  approx
}

fn largest_external_contour(binary: &GrayImage) -> Option<Vec<PixelPoint<i32>>> {
  let mut best: Option<(f64, Vec<PixelPoint<i32>>)> = None;
  for contour in find_contours::<i32>(binary) {
    // 只要最外层轮廓，孔洞不表示
    if !matches!(contour.border_type, BorderType::Outer) || contour.parent.is_some() {
      continue;
    }
    let area = enclosed_area(&contour.points);
    if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
      best = Some((area, contour.points));
    }
  }
  best.map(|(_, points)| points)
}

// 鞋带公式
fn enclosed_area(points: &[PixelPoint<i32>]) -> f64 {
  if points.len() < MIN_VERTICES {
    return 0.0;
  }
  let mut twice = 0.0f64;
  for (i, p) in points.iter().enumerate() {
    let q = points[(i + 1) % points.len()];
    twice += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
  }
  twice.abs() / 2.0
}
