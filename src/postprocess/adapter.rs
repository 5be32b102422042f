// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/postprocess/adapter.rs - 后端输出到标注的转换
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

use tracing::debug;

use crate::{
  annotation::{Annotation, Keypoint, OutputKind},
  backend::{BackendOutput, RawDetection, RawKeypoint},
  geometry::{DEFAULT_IOU_THRESHOLD, ImageSize, Point, keypoint_visibility, nms},
  postprocess::mask::{DEFAULT_VERTEX_BUDGET, Mask, mask_to_annotation},
};

/// 单次推理的后处理选项
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateOptions {
  pub output: OutputKind,
  /// 多候选掩码时只保留得分最高的一个
  pub multimask: bool,
  pub iou_threshold: f32,
  pub min_confidence: Option<f32>,
  pub vertex_budget: usize,
  /// 后端未给出类别时使用
  pub default_category: String,
}

impl Default for AnnotateOptions {
  fn default() -> Self {
    Self {
      output: OutputKind::Polygon,
      multimask: false,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      min_confidence: None,
      vertex_budget: DEFAULT_VERTEX_BUDGET,
      default_category: "object".to_string(),
    }
  }
}

fn category<'a>(detection: &'a RawDetection, options: &'a AnnotateOptions) -> &'a str {
  detection
    .class_name
    .as_deref()
    .unwrap_or(&options.default_category)
}

fn detection_rect(
  detection: &RawDetection,
  size: ImageSize,
  options: &AnnotateOptions,
) -> Option<Annotation> {
  let Some(bbox) = detection.bbox.as_ref() else {
    debug!("检测结果缺少边界框，跳过");
    return None;
  };
  Some(Annotation::rect(
    size.normalize_box(bbox),
    category(detection, options),
    detection.score,
  ))
}

fn normalize_keypoint(kp: &RawKeypoint, size: ImageSize) -> Keypoint {
  let p = size.normalize_point(Point::new(kp.x, kp.y));
  Keypoint(p.x, p.y, keypoint_visibility(kp.x, kp.y, kp.confidence))
}

// 得分最高者的下标，同分取靠前的
fn best_index(items: &[(RawDetection, Mask)]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (i, (d, _)) in items.iter().enumerate() {
    if best.is_none_or(|(_, s)| d.score > s) {
      best = Some((i, d.score));
    }
  }
  best.map(|(i, _)| i)
}

/// 将后端输出转换为归一化标注
///
/// 依次完成几何转换、置信度过滤与 NMS。
pub fn annotate(
  output: BackendOutput,
  size: ImageSize,
  options: &AnnotateOptions,
) -> Vec<Annotation> {
  let candidates: Vec<Annotation> = match output {
    BackendOutput::Detections(detections) => detections
      .iter()
      .filter_map(|d| detection_rect(d, size, options))
      .collect(),

    BackendOutput::DetectionsWithKeypoints(items) => items
      .iter()
      .filter_map(|(d, keypoints)| {
        let ann = detection_rect(d, size, options)?;
        Some(match keypoints {
          Some(kps) => {
            ann.with_keypoints(kps.iter().map(|k| normalize_keypoint(k, size)).collect())
          }
          None => ann,
        })
      })
      .collect(),

    BackendOutput::DetectionsWithMasks(mut items) => {
      if options.multimask && items.len() > 1 {
        if let Some(best) = best_index(&items) {
          debug!("多掩码输出 {} 个候选，保留第 {} 个", items.len(), best);
          items = vec![items.swap_remove(best)];
        }
      }
      items
        .iter()
        .filter_map(|(d, mask)| {
          mask_to_annotation(
            mask,
            size,
            options.output,
            options.vertex_budget,
            d.score,
            category(d, options),
          )
        })
        .collect()
    }
  };

  let candidates: Vec<Annotation> = match options.min_confidence {
    Some(threshold) => candidates
      .into_iter()
      .filter(|a| a.confidence >= threshold)
      .collect(),
    None => candidates,
  };

  let before = candidates.len();
  let kept = nms(candidates, options.iou_threshold);
  debug!("NMS: {} -> {}", before, kept.len());
  kept
}
