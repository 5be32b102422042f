// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/geometry/nms.rs - IoU 与非极大值抑制
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

use crate::geometry::BoundingBox;

/// 默认 NMS IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// 可参与 NMS 的候选
pub trait Suppressible {
  fn confidence(&self) -> f32;
  /// 用于计算重叠的轴对齐外接框
  fn bounding_box(&self) -> BoundingBox;
}

impl Suppressible for (BoundingBox, f32) {
  fn confidence(&self) -> f32 {
    self.1
  }

  fn bounding_box(&self) -> BoundingBox {
    self.0
  }
}

/// 计算两个边界框的 IoU
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  if x2 <= x1 || y2 <= y1 {
    return 0.0;
  }

  let intersection = (x2 - x1) * (y2 - y1);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心非极大值抑制
///
/// 按置信度降序稳定排序（同分保持输入顺序），依次保留最高者，
/// 并移除与之 IoU 不低于 `threshold` 的其余候选。
pub fn nms<T: Suppressible>(mut candidates: Vec<T>, threshold: f32) -> Vec<T> {
  if candidates.len() <= 1 {
    return candidates;
  }

  // 按置信度降序排序
  candidates.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

  let mut result = Vec::with_capacity(candidates.len());

  while !candidates.is_empty() {
    let best = candidates.remove(0);
    let best_box = best.bounding_box();

    candidates.retain(|other| iou(&best_box, &other.bounding_box()) < threshold);
    result.push(best);
  }

  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  #[test]
  fn identical_boxes_have_unit_iou() {
    let b = BoundingBox::new(0.1, 0.2, 0.3, 0.4);
    assert_abs_diff_eq!(iou(&b, &b), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn disjoint_boxes_have_zero_iou() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(2.0, 2.0, 1.0, 1.0);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn touching_edges_do_not_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5);
    let b = BoundingBox::new(0.5, 0.0, 0.5, 0.5);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn degenerate_boxes_never_overlap() {
    let a = BoundingBox::new(0.2, 0.2, 0.0, 0.0);
    assert_eq!(iou(&a, &a), 0.0);
  }

  #[test]
  fn partial_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    let b = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
    // 交集 1，并集 7
    assert_abs_diff_eq!(iou(&a, &b), 1.0 / 7.0, epsilon = 1e-6);
  }

  #[test]
  fn nms_keeps_highest_of_identical_boxes() {
    let b = BoundingBox::new(0.1, 0.1, 0.5, 0.5);
    let kept = nms(vec![(b, 0.8), (b, 0.9)], DEFAULT_IOU_THRESHOLD);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].1, 0.9);
  }

  #[test]
  fn nms_keeps_non_overlapping_in_confidence_order() {
    let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
    let b = BoundingBox::new(0.5, 0.5, 0.2, 0.2);
    let c = BoundingBox::new(0.01, 0.01, 0.2, 0.2);
    let kept = nms(vec![(a, 0.6), (b, 0.7), (c, 0.95)], 0.5);
    let scores: Vec<f32> = kept.iter().map(|k| k.1).collect();
    assert_eq!(scores, vec![0.95, 0.7]);
  }

  #[test]
  fn nms_ties_preserve_input_order() {
    let a = BoundingBox::new(0.0, 0.0, 0.4, 0.4);
    let b = BoundingBox::new(0.01, 0.01, 0.4, 0.4);
    let kept = nms(vec![(a, 0.5), (b, 0.5)], 0.5);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].0, a);

    let kept = nms(vec![(b, 0.5), (a, 0.5)], 0.5);
    assert_eq!(kept[0].0, b);
  }

  #[test]
  fn threshold_is_inclusive() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    let b = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
    let t = iou(&a, &b);
    assert_eq!(nms(vec![(a, 0.9), (b, 0.8)], t).len(), 1);
    assert_eq!(nms(vec![(a, 0.9), (b, 0.8)], t + 1e-3).len(), 2);
  }
}
