// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/main.rs - 工作进程主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::{Level, error, info};

use shanan_annotator::{backend::ClassicLoader, dispatcher::Dispatcher};

fn run(args: &args::Args) -> Result<()> {
  let config = args.worker_config();

  info!("Shanan 标注推理进程启动 (pid={})", std::process::id());
  info!("插件: {}", config.plugin_id.as_deref().unwrap_or("<未设置>"));
  info!(
    "插件目录: {}",
    config
      .plugin_dir
      .as_ref()
      .map(|p| p.display().to_string())
      .unwrap_or_else(|| "<未设置>".to_string())
  );
  info!(
    "数据根目录: {}",
    config
      .data_root
      .as_ref()
      .map(|p| p.display().to_string())
      .unwrap_or_else(|| "<未设置>".to_string())
  );
  info!("插件变体: {:?}", config.profile);

  let mut dispatcher = Dispatcher::new(ClassicLoader, &config);
  let stdin = io::stdin();
  let stdout = io::stdout();
  dispatcher.run(stdin.lock(), stdout.lock())?;
  Ok(())
}

fn main() {
  let args = args::Args::parse();

  // 标准输出只用于协议
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_max_level(if args.verbose {
      Level::DEBUG
    } else {
      Level::INFO
    })
    .init();

  if let Err(e) = run(&args) {
    error!("工作进程异常退出: {:#}", e);
  }
  info!("工作进程结束");
  std::process::exit(0);
}
