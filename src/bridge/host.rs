// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/bridge/host.rs - 训练会话
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

use std::{ops::ControlFlow, sync::Arc, thread};

use tracing::{debug, error, info, warn};

use crate::bridge::{
  BridgeClient, BridgeError, Inbound, LogLevel, Metrics, Outbound, OutputForwarder,
  ProgressTracker, StopFlag, TrainConfig,
};

/// 训练结果，模型路径相对于输出目录，不存在时为空串
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainOutcome {
  pub best_model: String,
  pub last_model: String,
  pub metrics: Option<Metrics>,
}

/// 具体的训练实现
pub trait Trainer {
  fn train(
    &mut self,
    config: &TrainConfig,
    ctx: &mut TrainingContext<'_>,
  ) -> Result<TrainOutcome, BridgeError>;
}

/// 训练回调上下文
pub struct TrainingContext<'a> {
  client: &'a BridgeClient,
  stop: StopFlag,
  tracker: ProgressTracker,
}

impl<'a> TrainingContext<'a> {
  pub fn new(client: &'a BridgeClient, stop: StopFlag, total_epochs: u32) -> Self {
    Self {
      client,
      stop,
      tracker: ProgressTracker::new(total_epochs),
    }
  }

  pub fn log(&self, level: LogLevel, text: impl Into<String>) -> Result<(), BridgeError> {
    let text = text.into();
    match level {
      LogLevel::Debug => debug!("{}", text),
      LogLevel::Info => info!("{}", text),
      LogLevel::Warning => warn!("{}", text),
      LogLevel::Error => error!("{}", text),
    }
    self.client.send(&Outbound::log(level, text))
  }

  pub fn should_stop(&self) -> bool {
    self.stop.is_stopped()
  }

  pub fn on_train_start(&mut self, batches_per_epoch: u32) -> Result<(), BridgeError> {
    self.tracker.start(batches_per_epoch);
    self.log(
      LogLevel::Info,
      format!(
        "训练开始: {} epochs, 每 epoch {} batches, 总计 {} batches",
        self.tracker.total_epochs(),
        batches_per_epoch,
        self.tracker.global_total()
      ),
    )
  }

  /// 批次结束时调用，每次只检查一次停止标志
  ///
  /// 返回 `Break` 时训练器应尽快结束。
  pub fn on_batch_end(
    &mut self,
    epoch_index: u32,
    metrics: Metrics,
  ) -> Result<ControlFlow<()>, BridgeError> {
    if self.stop.is_stopped() {
      return Ok(ControlFlow::Break(()));
    }
    let progress = self.tracker.batch_end(epoch_index, metrics);
    self.client.send(&Outbound::Progress(progress))?;
    Ok(ControlFlow::Continue(()))
  }

  /// epoch 验证结束，`epoch_index` 从 0 开始
  pub fn on_epoch_end(&self, epoch_index: u32, metrics: Metrics) -> Result<(), BridgeError> {
    if self.stop.is_stopped() {
      return Ok(());
    }
    self.client.send(&Outbound::EpochEnd {
      epoch: epoch_index + 1,
      metrics,
    })
  }

  /// 训练器的文本输出，按行转发给宿主
  pub fn output(&self) -> OutputForwarder<'a> {
    OutputForwarder::new(self.client)
  }
}

// 训练期间读取控制消息，收到 STOP_TRAIN 或连接断开时置位停止标志
fn watch_control(client: &BridgeClient, stop: &StopFlag) {
  loop {
    match client.recv() {
      Ok(Some(Inbound::StopTrain)) => {
        info!("收到停止命令，正在停止训练...");
        stop.stop();
        return;
      }
      Ok(Some(Inbound::StartTrain(_))) => warn!("训练进行中，忽略 START_TRAIN"),
      Ok(Some(Inbound::Unknown(kind))) => warn!("未知消息类型: {}", kind),
      Err(BridgeError::Codec(e)) => warn!("无法解析宿主消息: {}", e),
      Ok(None) => {
        debug!("控制连接已关闭");
        stop.stop();
        return;
      }
      Err(e) => {
        warn!("读取控制消息失败: {}", e);
        stop.stop();
        return;
      }
    }
  }
}

/// 一次训练插件会话：等待指令、执行训练、报告结果
pub struct TrainingHost {
  client: Arc<BridgeClient>,
  task_id: String,
  stop: StopFlag,
}

impl TrainingHost {
  pub fn new(client: BridgeClient, task_id: impl Into<String>) -> Self {
    Self {
      client: Arc::new(client),
      task_id: task_id.into(),
      stop: StopFlag::new(),
    }
  }

  pub fn stop_flag(&self) -> StopFlag {
    self.stop.clone()
  }

  fn log(&self, level: LogLevel, text: impl Into<String>) {
    let text = text.into();
    info!("{}", text);
    if let Err(e) = self.client.send(&Outbound::log(level, text)) {
      warn!("发送日志失败: {}", e);
    }
  }

  /// 运行会话直到训练结束、收到停止或连接断开
  pub fn run<T: Trainer>(self, trainer: &mut T) -> Result<(), BridgeError> {
    self.log(LogLevel::Info, "等待训练指令...");
    let result = self.serve(trainer);
    if let Err(e) = &result {
      error!("运行异常: {}", e);
      self
        .client
        .send(&Outbound::error("插件异常", e.to_string()))
        .ok();
    }
    self.log(LogLevel::Info, "插件退出");
    self.client.close();
    result
  }

  fn serve<T: Trainer>(&self, trainer: &mut T) -> Result<(), BridgeError> {
    loop {
      match self.client.recv() {
        Ok(None) => {
          self.log(LogLevel::Warning, "连接断开");
          return Ok(());
        }
        Ok(Some(Inbound::StartTrain(config))) => {
          self.log(LogLevel::Info, "收到 START_TRAIN 指令");
          return self.train(trainer, &config);
        }
        Ok(Some(Inbound::StopTrain)) => {
          self.stop.stop();
          self.log(LogLevel::Info, "收到停止命令");
          return Ok(());
        }
        Ok(Some(Inbound::Unknown(kind))) => {
          self.log(LogLevel::Warning, format!("未知消息类型: {}", kind));
        }
        Err(BridgeError::Codec(e)) => {
          self.log(LogLevel::Warning, format!("无法解析消息: {}", e));
        }
        Err(e) => return Err(e),
      }
    }
  }

  fn train<T: Trainer>(&self, trainer: &mut T, config: &TrainConfig) -> Result<(), BridgeError> {
    self.log(LogLevel::Info, format!("任务ID: {}", self.task_id));
    self.log(LogLevel::Info, format!("数据集路径: {}", config.dataset_path));
    self.log(LogLevel::Info, format!("模型路径: {}", config.model_path));
    self.log(LogLevel::Info, format!("输出路径: {}", config.output_path));
    self.log(
      LogLevel::Info,
      format!(
        "训练参数: {}",
        serde_json::to_string(&config.params).unwrap_or_default()
      ),
    );

    let watcher = {
      let client = Arc::clone(&self.client);
      let stop = self.stop.clone();
      thread::spawn(move || watch_control(&client, &stop))
    };

    let outcome = {
      let mut ctx = TrainingContext::new(&self.client, self.stop.clone(), config.params.epochs);
      trainer.train(config, &mut ctx)
    };

    let report = match outcome {
      Ok(outcome) => {
        let message = if self.stop.is_stopped() {
          "训练已停止"
        } else {
          "训练完成"
        };
        info!("{}", message);
        self.client.send(&Outbound::Done {
          message: message.to_string(),
          best_model: outcome.best_model,
          last_model: outcome.last_model,
          metrics: outcome.metrics.filter(|m| !m.is_empty()),
        })
      }
      Err(e) => {
        self.log(LogLevel::Error, format!("训练异常: {}", e));
        self.client.send(&Outbound::error("训练失败", e.to_string()))
      }
    };

    self.client.shutdown_read();
    if watcher.join().is_err() {
      warn!("控制线程异常退出");
    }
    report
  }
}
