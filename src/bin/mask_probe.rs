// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/bin/mask_probe.rs - 掩码后处理调试工具
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use shanan_annotator::{
  annotation::OutputKind,
  geometry::ImageSize,
  postprocess::{DEFAULT_VERTEX_BUDGET, Mask, mask_to_annotation},
};

/// 对掩码图像运行后处理并输出标注 JSON
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 掩码图像，按灰度读取
  #[arg(long, value_name = "FILE")]
  pub mask: String,
  /// 输出类型
  #[arg(long, value_enum, default_value_t = OutputKind::Polygon)]
  pub kind: OutputKind,
  /// 多边形最大顶点数
  #[arg(long, default_value_t = DEFAULT_VERTEX_BUDGET, value_name = "COUNT")]
  pub max_points: usize,
  /// 写入标注的置信度
  #[arg(long, default_value = "1.0", value_name = "SCORE")]
  pub confidence: f32,
  /// 把灰度值当作概率（除以 255）而不是二值
  #[arg(long)]
  pub probability: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();
  info!("掩码文件: {}", args.mask);

  let gray = image::open(&args.mask)
    .with_context(|| format!("无法读取掩码: {}", args.mask))?
    .to_luma8();
  let (width, height) = gray.dimensions();
  info!("掩码尺寸: {}x{}", width, height);

  let mask = if args.probability {
    let values = gray.pixels().map(|p| p[0] as f32 / 255.0).collect();
    Mask::from_values(width, height, values).context("掩码数据长度不匹配")?
  } else {
    Mask::Binary(gray)
  };

  let now = std::time::Instant::now();
  let annotation = mask_to_annotation(
    &mask,
    ImageSize::new(width, height),
    args.kind,
    args.max_points,
    args.confidence,
    "object",
  );
  info!("后处理完成，耗时: {:.2?}", now.elapsed());

  match annotation {
    Some(annotation) => println!("{}", serde_json::to_string_pretty(&annotation)?),
    None => {
      warn!("掩码中没有可用的轮廓");
      println!("null");
    }
  }

  Ok(())
}
