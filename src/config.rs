// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/config.rs - 工作进程配置
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

use std::path::PathBuf;

use clap::ValueEnum;

use crate::{annotation::OutputKind, postprocess::AnnotateOptions};

/// 插件变体，决定推理请求未指定时的默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WorkerProfile {
  /// 点/框提示分割
  #[default]
  Segment,
  /// 视觉提示找相似目标
  VisualPrompt,
  /// 目标检测
  Detect,
}

impl WorkerProfile {
  pub fn default_output(&self) -> OutputKind {
    match self {
      WorkerProfile::Segment => OutputKind::Polygon,
      WorkerProfile::VisualPrompt | WorkerProfile::Detect => OutputKind::Rect,
    }
  }

  pub fn default_category(&self) -> &'static str {
    match self {
      WorkerProfile::VisualPrompt => "similar",
      WorkerProfile::Segment | WorkerProfile::Detect => "object",
    }
  }

  pub fn default_multimask(&self) -> bool {
    matches!(self, WorkerProfile::Segment)
  }
}

/// 工作进程配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerConfig {
  /// 数据根目录，相对图像路径以此为基准
  pub data_root: Option<PathBuf>,
  /// 插件资源目录，优先于数据根目录查找模型
  pub plugin_dir: Option<PathBuf>,
  /// 仅用于日志
  pub plugin_id: Option<String>,
  pub profile: WorkerProfile,
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

impl WorkerConfig {
  /// 空字符串视为未设置
  pub fn new(
    data_root: Option<String>,
    plugin_dir: Option<String>,
    plugin_id: Option<String>,
    profile: WorkerProfile,
  ) -> Self {
    Self {
      data_root: non_empty(data_root).map(PathBuf::from),
      plugin_dir: non_empty(plugin_dir).map(PathBuf::from),
      plugin_id: non_empty(plugin_id),
      profile,
    }
  }

  /// 按插件变体生成默认后处理选项
  pub fn annotate_options(&self) -> AnnotateOptions {
    AnnotateOptions {
      output: self.profile.default_output(),
      multimask: self.profile.default_multimask(),
      default_category: self.profile.default_category().to_string(),
      ..Default::default()
    }
  }
}
