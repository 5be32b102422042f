// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/backend/classic.rs - 传统阈值分割后端
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

use std::{
  collections::{HashMap, HashSet},
  path::Path,
};

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::{
  contrast::otsu_level,
  region_labelling::{Connectivity, connected_components},
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
  backend::{
    BackendError, BackendLoader, BackendOutput, InferenceBackend, PixelPrompt, RawDetection,
  },
  geometry::{PixelBox, Point},
  postprocess::Mask,
};

const DEFAULT_MIN_COMPONENT_AREA: u32 = 16;
const DEFAULT_DEVICE: &str = "cpu";

fn default_min_component_area() -> u32 {
  DEFAULT_MIN_COMPONENT_AREA
}

/// 传统后端参数文件，空对象即全部默认
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicParams {
  #[serde(default)]
  pub category_name: Option<String>,
  /// 小于该像素数的连通域会被丢弃
  #[serde(default = "default_min_component_area")]
  pub min_component_area: u32,
  #[serde(default)]
  pub device: Option<String>,
}

impl Default for ClassicParams {
  fn default() -> Self {
    Self {
      category_name: None,
      min_component_area: DEFAULT_MIN_COMPONENT_AREA,
      device: None,
    }
  }
}

/// 从 JSON 参数文件加载 [`ClassicSegmenter`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicLoader;

impl BackendLoader for ClassicLoader {
  fn load(&self, weights: &Path) -> Result<Box<dyn InferenceBackend>, BackendError> {
    info!("加载传统分割参数: {}", weights.display());
    let text = std::fs::read_to_string(weights)?;
    let params = if text.trim().is_empty() {
      ClassicParams::default()
    } else {
      serde_json::from_str(&text).map_err(|e| BackendError::Load(e.to_string()))?
    };
    debug!("参数: {:?}", params);
    Ok(Box::new(ClassicSegmenter::new(params)))
  }
}

/// 基于 Otsu 阈值与连通域的交互式分割
pub struct ClassicSegmenter {
  params: ClassicParams,
  device: String,
  gray: Option<GrayImage>,
}

// 感兴趣区域，像素坐标
#[derive(Debug, Clone, Copy)]
struct Roi {
  x: u32,
  y: u32,
  width: u32,
  height: u32,
}

impl Roi {
  fn contains(&self, p: Point) -> Option<(u32, u32)> {
    if p.x < 0.0 || p.y < 0.0 {
      return None;
    }
    let (x, y) = (p.x.floor() as u32, p.y.floor() as u32);
    if x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height {
      Some((x - self.x, y - self.y))
    } else {
      None
    }
  }
}

impl ClassicSegmenter {
  pub fn new(params: ClassicParams) -> Self {
    let device = params
      .device
      .clone()
      .unwrap_or_else(|| DEFAULT_DEVICE.to_string());
    Self {
      params,
      device,
      gray: None,
    }
  }

  pub fn params(&self) -> &ClassicParams {
    &self.params
  }

  fn roi(&self, gray: &GrayImage, bbox: Option<&PixelBox>) -> Option<Roi> {
    let (w, h) = gray.dimensions();
    let Some(b) = bbox else {
      return Some(Roi {
        x: 0,
        y: 0,
        width: w,
        height: h,
      });
    };
    let x1 = b.x1.max(0.0).floor() as u32;
    let y1 = b.y1.max(0.0).floor() as u32;
    let x2 = (b.x2.ceil().max(0.0) as u32).min(w);
    let y2 = (b.y2.ceil().max(0.0) as u32).min(h);
    if x2 <= x1 || y2 <= y1 {
      return None;
    }
    Some(Roi {
      x: x1,
      y: y1,
      width: x2 - x1,
      height: y2 - y1,
    })
  }
}

impl InferenceBackend for ClassicSegmenter {
  fn device(&self) -> &str {
    &self.device
  }

  fn set_image(&mut self, image: &RgbImage) -> Result<(), BackendError> {
    self.gray = Some(imageops::grayscale(image));
    Ok(())
  }

  fn predict(&mut self, prompt: &PixelPrompt) -> Result<BackendOutput, BackendError> {
    let gray = self
      .gray
      .as_ref()
      .ok_or_else(|| BackendError::Inference("image context not set".to_string()))?;
    let (w, h) = gray.dimensions();
    let empty = BackendOutput::DetectionsWithMasks(Vec::new());
    if w == 0 || h == 0 {
      return Ok(empty);
    }

    let Some(roi) = self.roi(gray, prompt.bbox.as_ref()) else {
      debug!("提示框与图像无交集");
      return Ok(empty);
    };
    let patch = imageops::crop_imm(gray, roi.x, roi.y, roi.width, roi.height).to_image();
    let level = otsu_level(&patch);

    let seed = prompt
      .positives()
      .next()
      .and_then(|p| roi.contains(p))
      .unwrap_or((roi.width / 2, roi.height / 2));
    let bright = patch.get_pixel(seed.0, seed.1)[0] > level;
    debug!("Otsu 阈值 {}，前景为{}", level, if bright { "亮" } else { "暗" });

    let binary = GrayImage::from_fn(roi.width, roi.height, |x, y| {
      if (patch.get_pixel(x, y)[0] > level) == bright {
        Luma([255u8])
      } else {
        Luma([0u8])
      }
    });
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    let mut areas: HashMap<u32, u32> = HashMap::new();
    for p in labels.pixels() {
      if p[0] != 0 {
        *areas.entry(p[0]).or_default() += 1;
      }
    }

    let label_at = |p: Point| {
      roi
        .contains(p)
        .map(|(x, y)| labels.get_pixel(x, y)[0])
        .filter(|l| *l != 0)
    };

    let mut selected: HashSet<u32> = prompt.positives().filter_map(label_at).collect();
    if selected.is_empty() {
      let seed_label = labels.get_pixel(seed.0, seed.1)[0];
      if seed_label != 0 {
        selected.insert(seed_label);
      } else if let Some((label, _)) = areas
        .iter()
        .max_by_key(|(l, a)| (**a, std::cmp::Reverse(**l)))
      {
        selected.insert(*label);
      }
    }
    for label in prompt.negatives().filter_map(label_at) {
      selected.remove(&label);
    }
    selected.retain(|l| areas.get(l).copied().unwrap_or(0) >= self.params.min_component_area);

    if selected.is_empty() {
      debug!("没有保留的连通域");
      return Ok(empty);
    }

    let mut mask = GrayImage::new(w, h);
    let (mut fg_sum, mut fg_count, mut bg_sum, mut bg_count) = (0u64, 0u64, 0u64, 0u64);
    let (mut x_min, mut y_min, mut x_max, mut y_max) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (x, y, label) in labels.enumerate_pixels() {
      let value = patch.get_pixel(x, y)[0] as u64;
      if selected.contains(&label[0]) {
        let (gx, gy) = (x + roi.x, y + roi.y);
        mask.put_pixel(gx, gy, Luma([255]));
        fg_sum += value;
        fg_count += 1;
        x_min = x_min.min(gx);
        y_min = y_min.min(gy);
        x_max = x_max.max(gx);
        y_max = y_max.max(gy);
      } else {
        bg_sum += value;
        bg_count += 1;
      }
    }

    let score = if bg_count == 0 {
      1.0
    } else {
      let fg_mean = fg_sum as f32 / fg_count as f32;
      let bg_mean = bg_sum as f32 / bg_count as f32;
      ((fg_mean - bg_mean).abs() / 255.0).clamp(0.0, 1.0)
    };

    if prompt.confidence.is_some_and(|threshold| score < threshold) {
      debug!("分割得分 {:.3} 低于阈值", score);
      return Ok(empty);
    }

    let bbox = PixelBox::new(
      x_min as f32,
      y_min as f32,
      (x_max + 1) as f32,
      (y_max + 1) as f32,
    );
    let mut detection = RawDetection::new(Some(bbox), score);
    if let Some(name) = &self.params.category_name {
      detection = detection.with_class(name.clone());
    }
    debug!("分割完成: {} 个前景像素, 得分 {:.3}", fg_count, score);

    Ok(BackendOutput::DetectionsWithMasks(vec![(
      detection,
      Mask::Binary(mask),
    )]))
  }
}
