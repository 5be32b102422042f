// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/bridge/client.rs - 训练桥接 TCP 客户端
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
  net::{Ipv4Addr, Shutdown, TcpStream},
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
};

use tracing::debug;

use crate::bridge::{BridgeError, Inbound, Outbound};

/// 与宿主之间的回环连接
///
/// 发送端由互斥锁串行化，可在多个线程间共享。
pub struct BridgeClient {
  writer: Mutex<TcpStream>,
  reader: Mutex<BufReader<TcpStream>>,
}

impl BridgeClient {
  /// 连接本机端口
  pub fn connect(port: u16) -> Result<Self, BridgeError> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).map_err(BridgeError::Connect)?;
    debug!("已连接宿主端口 {}", port);
    Self::from_stream(stream)
  }

  pub fn from_stream(stream: TcpStream) -> Result<Self, BridgeError> {
    let reader = stream.try_clone()?;
    Ok(Self {
      writer: Mutex::new(stream),
      reader: Mutex::new(BufReader::new(reader)),
    })
  }

  /// 发送一帧
  pub fn send(&self, message: &Outbound) -> Result<(), BridgeError> {
    let line = message.encode()?;
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
  }

  /// 读取下一帧，连接关闭时返回 None；空行被跳过
  pub fn recv(&self) -> Result<Option<Inbound>, BridgeError> {
    let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
    let mut line = String::new();
    loop {
      line.clear();
      if reader.read_line(&mut line)? == 0 {
        return Ok(None);
      }
      let trimmed = line.trim();
      if !trimmed.is_empty() {
        return Inbound::decode(trimmed).map(Some);
      }
    }
  }

  /// 关闭读方向，唤醒阻塞在 `recv` 上的线程
  pub fn shutdown_read(&self) {
    let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.shutdown(Shutdown::Read).ok();
  }

  pub fn close(&self) {
    let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.shutdown(Shutdown::Both).ok();
  }
}

/// 协作式停止标志
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{io::BufReader, net::TcpListener, thread};

  #[test]
  fn stop_flag_is_shared() {
    let flag = StopFlag::new();
    let other = flag.clone();
    assert!(!other.is_stopped());
    flag.stop();
    assert!(other.is_stopped());
  }

  #[test]
  fn send_and_receive_lines() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let host = thread::spawn(move || {
      let (stream, _) = listener.accept().unwrap();
      let mut writer = stream.try_clone().unwrap();
      let mut reader = BufReader::new(stream);
      let mut line = String::new();
      reader.read_line(&mut line).unwrap();
      writer.write_all(b"\n{\"type\":\"STOP_TRAIN\"}\n").unwrap();
      line
    });

    let client = BridgeClient::connect(port).unwrap();
    client
      .send(&Outbound::Output {
        text: "hello".to_string(),
      })
      .unwrap();
    assert_eq!(client.recv().unwrap(), Some(Inbound::StopTrain));
    let received = host.join().unwrap();
    assert_eq!(received.trim(), r#"{"type":"OUTPUT","payload":{"text":"hello"}}"#);
    assert_eq!(client.recv().unwrap(), None);
  }
}
