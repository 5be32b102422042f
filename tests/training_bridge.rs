// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// tests/training_bridge.rs - 训练桥接集成测试
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
  io::{BufRead, BufReader, Write},
  net::{Ipv4Addr, TcpListener, TcpStream},
  thread,
  time::Duration,
};

use approx::assert_abs_diff_eq;
use serde_json::{Value, json};

use shanan_annotator::bridge::{
  BridgeClient, BridgeError, LogLevel, Metrics, TrainConfig, TrainOutcome, Trainer,
  TrainingContext, TrainingHost,
};

struct FakeTrainer {
  batches: u32,
  delay: Duration,
  fail: bool,
}

impl Trainer for FakeTrainer {
  fn train(
    &mut self,
    config: &TrainConfig,
    ctx: &mut TrainingContext<'_>,
  ) -> Result<TrainOutcome, BridgeError> {
    ctx.on_train_start(self.batches)?;
    writeln!(ctx.output(), "loading {}\n\nready", config.model_path)?;
    if self.fail {
      return Err(BridgeError::Training("dataset is empty".to_string()));
    }

    for epoch in 0..config.params.epochs {
      for batch in 0..self.batches {
        let metrics = Metrics::from([("trainLoss".to_string(), 1.0 / (batch + 1) as f64)]);
        if ctx.on_batch_end(epoch, metrics)?.is_break() {
          ctx.log(LogLevel::Warning, "stopping early")?;
          return Ok(TrainOutcome {
            last_model: "train/weights/last.pt".to_string(),
            ..Default::default()
          });
        }
        thread::sleep(self.delay);
      }
      ctx.on_epoch_end(epoch, Metrics::from([("mAP50".to_string(), 0.5)]))?;
    }

    Ok(TrainOutcome {
      best_model: "train/weights/best.pt".to_string(),
      last_model: "train/weights/last.pt".to_string(),
      metrics: Some(Metrics::from([("best_mAP50".to_string(), 0.5)])),
    })
  }
}

fn start_frame(epochs: u32) -> String {
  json!({
    "type": "START_TRAIN",
    "payload": {
      "datasetPath": "/data/set",
      "outputPath": "/data/out",
      "modelPath": "yolo11n.pt",
      "params": {"epochs": epochs}
    }
  })
  .to_string()
    + "\n"
}

/// 启动插件端，返回宿主端连接与插件线程
fn launch(trainer: FakeTrainer) -> (TcpStream, thread::JoinHandle<Result<(), BridgeError>>) {
  let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
  let port = listener.local_addr().unwrap().port();
  let plugin = thread::spawn(move || {
    let mut trainer = trainer;
    let client = BridgeClient::connect(port)?;
    TrainingHost::new(client, "task-42").run(&mut trainer)
  });
  let (stream, _) = listener.accept().unwrap();
  (stream, plugin)
}

fn frames_of(frames: &[Value], kind: &str) -> Vec<Value> {
  frames
    .iter()
    .filter(|f| f["type"] == kind)
    .map(|f| f["payload"].clone())
    .collect()
}

#[test]
fn full_training_run() {
  let (stream, plugin) = launch(FakeTrainer {
    batches: 3,
    delay: Duration::ZERO,
    fail: false,
  });
  let mut writer = stream.try_clone().unwrap();
  writer.write_all(start_frame(2).as_bytes()).unwrap();

  let frames: Vec<Value> = BufReader::new(stream)
    .lines()
    .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
    .collect();
  plugin.join().unwrap().unwrap();

  let progress = frames_of(&frames, "PROGRESS");
  assert_eq!(progress.len(), 6);
  assert_eq!(progress[0]["epoch"], 1);
  assert_eq!(progress[0]["batch"], 1);
  assert_eq!(progress[0]["totalEpochs"], 2);
  assert_eq!(progress[3]["epoch"], 2);
  assert_eq!(progress[3]["batch"], 1);
  assert_eq!(progress[3]["globalBatch"], 4);
  assert_eq!(progress[5]["globalTotalBatches"], 6);
  assert_abs_diff_eq!(progress[5]["progress"].as_f64().unwrap(), 1.0, epsilon = 1e-9);
  assert_abs_diff_eq!(
    progress[1]["metrics"]["trainLoss"].as_f64().unwrap(),
    0.5,
    epsilon = 1e-9
  );

  let epochs: Vec<Value> = frames_of(&frames, "EPOCH_END")
    .iter()
    .map(|p| p["epoch"].clone())
    .collect();
  assert_eq!(epochs, vec![json!(1), json!(2)]);

  let outputs: Vec<Value> = frames_of(&frames, "OUTPUT")
    .iter()
    .map(|p| p["text"].clone())
    .collect();
  assert_eq!(outputs, vec![json!("loading yolo11n.pt"), json!("ready")]);

  let done = frames_of(&frames, "DONE");
  assert_eq!(done.len(), 1);
  assert_eq!(done[0]["message"], "训练完成");
  assert_eq!(done[0]["bestModel"], "train/weights/best.pt");
  assert_eq!(done[0]["metrics"]["best_mAP50"], 0.5);

  let last = frames.last().unwrap();
  assert_eq!(last["type"], "LOG");
  assert_eq!(last["payload"]["text"], "插件退出");
}

#[test]
fn stop_during_training() {
  let (stream, plugin) = launch(FakeTrainer {
    batches: 10,
    delay: Duration::from_millis(2),
    fail: false,
  });
  let mut writer = stream.try_clone().unwrap();
  writer.write_all(start_frame(1000).as_bytes()).unwrap();

  let mut frames = Vec::new();
  let mut stop_sent = false;
  for line in BufReader::new(stream).lines() {
    let frame: Value = serde_json::from_str(&line.unwrap()).unwrap();
    if !stop_sent && frame["type"] == "PROGRESS" {
      writer.write_all(b"{\"type\":\"STOP_TRAIN\"}\n").unwrap();
      stop_sent = true;
    }
    frames.push(frame);
  }
  plugin.join().unwrap().unwrap();

  let progress = frames_of(&frames, "PROGRESS");
  assert!(!progress.is_empty());
  assert!(progress.len() < 10_000);

  let done = frames_of(&frames, "DONE");
  assert_eq!(done.len(), 1);
  assert_eq!(done[0]["message"], "训练已停止");
  assert_eq!(done[0]["bestModel"], "");
  assert!(done[0].get("metrics").is_none());
}

#[test]
fn trainer_failure_is_reported() {
  let (stream, plugin) = launch(FakeTrainer {
    batches: 1,
    delay: Duration::ZERO,
    fail: true,
  });
  let mut writer = stream.try_clone().unwrap();
  writer.write_all(start_frame(1).as_bytes()).unwrap();

  let frames: Vec<Value> = BufReader::new(stream)
    .lines()
    .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
    .collect();
  plugin.join().unwrap().unwrap();

  let errors = frames_of(&frames, "ERROR");
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0]["message"], "训练失败");
  assert_eq!(errors[0]["details"], "dataset is empty");
  assert!(frames_of(&frames, "DONE").is_empty());
}

#[test]
fn host_disconnect_ends_session() {
  let (stream, plugin) = launch(FakeTrainer {
    batches: 1,
    delay: Duration::ZERO,
    fail: false,
  });
  stream.shutdown(std::net::Shutdown::Write).unwrap();

  let frames: Vec<Value> = BufReader::new(stream)
    .lines()
    .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
    .collect();
  plugin.join().unwrap().unwrap();

  let texts: Vec<Value> = frames_of(&frames, "LOG")
    .iter()
    .map(|p| p["text"].clone())
    .collect();
  assert!(texts.contains(&json!("连接断开")));
  assert!(frames_of(&frames, "DONE").is_empty());
}
