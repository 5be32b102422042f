// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/bridge/progress.rs - 训练进度统计与输出转发
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

use std::io;

use tracing::debug;

use crate::bridge::{BridgeClient, Metrics, Outbound, ProgressPayload};

/// 训练器未报告每 epoch 批次数时的取值
pub const FALLBACK_BATCHES_PER_EPOCH: u32 = 100;

/// 批次与全局进度计数
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
  total_epochs: u32,
  batches_per_epoch: u32,
  global_batch: u64,
  epoch_batch: u32,
  last_epoch: Option<u32>,
}

impl ProgressTracker {
  pub fn new(total_epochs: u32) -> Self {
    Self {
      total_epochs,
      ..Default::default()
    }
  }

  /// 训练开始，重置全部计数
  pub fn start(&mut self, batches_per_epoch: u32) {
    self.batches_per_epoch = batches_per_epoch;
    self.global_batch = 0;
    self.epoch_batch = 0;
    self.last_epoch = None;
  }

  pub fn total_epochs(&self) -> u32 {
    self.total_epochs
  }

  pub fn batches_per_epoch(&self) -> u32 {
    self.batches_per_epoch
  }

  pub fn global_total(&self) -> u64 {
    self.total_epochs as u64 * self.batches_per_epoch as u64
  }

  /// 记录一个批次结束，`epoch_index` 从 0 开始
  ///
  /// epoch 变化时当前 epoch 的批次计数归零。
  pub fn batch_end(&mut self, epoch_index: u32, metrics: Metrics) -> ProgressPayload {
    if self.batches_per_epoch == 0 {
      debug!("未收到批次数，使用默认值 {}", FALLBACK_BATCHES_PER_EPOCH);
      self.batches_per_epoch = FALLBACK_BATCHES_PER_EPOCH;
    }
    if self.last_epoch != Some(epoch_index) {
      self.last_epoch = Some(epoch_index);
      self.epoch_batch = 0;
    }
    self.epoch_batch += 1;
    self.global_batch += 1;

    let global_total = self.global_total();
    let progress = if global_total > 0 {
      self.global_batch as f64 / global_total as f64
    } else {
      0.0
    };

    ProgressPayload {
      epoch: epoch_index + 1,
      total_epochs: self.total_epochs,
      batch: self.epoch_batch,
      total_batches: self.batches_per_epoch,
      global_batch: self.global_batch,
      global_total_batches: global_total,
      progress,
      metrics,
    }
  }
}

/// 把写入的文本按行转发为 `OUTPUT` 帧
///
/// 空白行被丢弃，未以换行结束的残余在 `flush` 或析构时发送。
pub struct OutputForwarder<'a> {
  client: &'a BridgeClient,
  buffer: Vec<u8>,
}

impl<'a> OutputForwarder<'a> {
  pub fn new(client: &'a BridgeClient) -> Self {
    Self {
      client,
      buffer: Vec::new(),
    }
  }

  // 只解码完整的行，跨 write 调用拆开的多字节字符不会被破坏
  fn send_line(&self, line: &[u8]) -> io::Result<()> {
    let line = String::from_utf8_lossy(line);
    let text = line.trim();
    if text.is_empty() {
      return Ok(());
    }
    self
      .client
      .send(&Outbound::Output {
        text: text.to_string(),
      })
      .map_err(io::Error::other)
  }
}

impl io::Write for OutputForwarder<'_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.buffer.extend_from_slice(buf);
    while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
      let line: Vec<u8> = self.buffer.drain(..=pos).collect();
      self.send_line(&line)?;
    }
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    let rest = std::mem::take(&mut self.buffer);
    self.send_line(&rest)
  }
}

impl Drop for OutputForwarder<'_> {
  fn drop(&mut self) {
    let _ = io::Write::flush(self);
  }
}
