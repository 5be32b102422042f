// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/args.rs - 工作进程参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;

use shanan_annotator::config::{WorkerConfig, WorkerProfile};

/// 标注推理工作进程
///
/// 通过标准输入输出收发行式 JSON 请求，日志只写到标准错误。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 数据根目录，相对的图像与模型路径以此为基准
  #[arg(long, env = "EASYMARK_DATA_PATH", value_name = "DIR")]
  pub data_root: Option<String>,

  /// 插件资源目录，查找模型时优先于数据根目录
  #[arg(long, env = "EASYMARK_PLUGIN_PATH", value_name = "DIR")]
  pub plugin_dir: Option<String>,

  /// 插件标识，仅用于日志
  #[arg(long, env = "EASYMARK_PLUGIN_ID", value_name = "ID")]
  pub plugin_id: Option<String>,

  /// 插件变体，决定默认输出类型与类别名
  #[arg(long, value_enum, default_value_t = WorkerProfile::Segment)]
  pub profile: WorkerProfile,

  /// 输出调试日志
  #[arg(long, short)]
  pub verbose: bool,
}

impl Args {
  pub fn worker_config(&self) -> WorkerConfig {
    WorkerConfig::new(
      self.data_root.clone(),
      self.plugin_dir.clone(),
      self.plugin_id.clone(),
      self.profile,
    )
  }
}
