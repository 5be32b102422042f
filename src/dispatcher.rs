// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/dispatcher.rs - 命令分发主循环
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
  any::Any,
  io::{self, BufRead, Write},
  panic::{self, AssertUnwindSafe},
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  backend::BackendLoader,
  config::WorkerConfig,
  postprocess::AnnotateOptions,
  protocol::{
    Command, InferParams, LoadModelParams, Payload, ProtocolError, Request, Response,
    SetImageParams, write_response,
  },
  session::{PathResolver, Session, SessionError},
};

#[derive(Error, Debug)]
enum HandlerError {
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
  #[error(transparent)]
  Session(#[from] SessionError),
}

/// 处理完一条请求后是否继续读取
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Shutdown,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

/// 持有会话并逐行处理请求
pub struct Dispatcher<L: BackendLoader> {
  loader: L,
  resolver: PathResolver,
  defaults: AnnotateOptions,
  session: Session,
}

impl<L: BackendLoader> Dispatcher<L> {
  pub fn new(loader: L, config: &WorkerConfig) -> Self {
    Self {
      loader,
      resolver: PathResolver::new(config.data_root.clone(), config.plugin_dir.clone()),
      defaults: config.annotate_options(),
      session: Session::new(),
    }
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  /// 主循环，遇到 `shutdown` 或输入结束时返回
  ///
  /// 只有写出响应失败才会返回错误。
  pub fn run<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> io::Result<()> {
    let mut buf = Vec::new();
    loop {
      buf.clear();
      if reader.read_until(b'\n', &mut buf)? == 0 {
        info!("输入已关闭，退出");
        self.session.unload();
        return Ok(());
      }

      let Ok(line) = std::str::from_utf8(&buf) else {
        warn!("输入不是有效的 UTF-8，已忽略");
        continue;
      };
      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => {
          warn!("无法解析请求: {}", e);
          continue;
        }
      };

      let (response, flow) = self.handle(&request);
      write_response(&mut writer, &response)?;
      if flow == Flow::Shutdown {
        info!("收到关闭指令，退出");
        return Ok(());
      }
    }
  }

  /// 处理单条请求，任何失败都转换为错误响应
  pub fn handle(&mut self, request: &Request) -> (Response, Flow) {
    let Some(command) = Command::parse(&request.cmd) else {
      warn!("未知命令: {}", request.cmd);
      return (
        Response::err(request, format!("Unknown command: {}", request.cmd)),
        Flow::Continue,
      );
    };
    debug!("请求 {}: {}", request.request_id, command.as_str());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(command, request)));
    let response = match outcome {
      Ok(Ok(payload)) => Response::ok(request, payload),
      Ok(Err(e)) => {
        warn!("{} 失败: {}", command.as_str(), e);
        Response::err(request, e.to_string())
      }
      Err(panic) => {
        let message = panic_message(&*panic);
        error!("{} 处理时崩溃: {}", command.as_str(), message);
        Response::err(request, format!("Internal error: {}", message))
      }
    };

    let flow = if command == Command::Shutdown {
      Flow::Shutdown
    } else {
      Flow::Continue
    };
    (response, flow)
  }

  fn execute(
    &mut self,
    command: Command,
    request: &Request,
  ) -> Result<Option<Payload>, HandlerError> {
    match command {
      Command::LoadModel => {
        let params: LoadModelParams = request.params()?;
        let model_path = self
          .session
          .load_model(&self.loader, &self.resolver, &params.weights)?
          .display()
          .to_string();
        let device = self.session.device().unwrap_or_default().to_string();
        Ok(Some(Payload::ModelLoaded { model_path, device }))
      }
      Command::SetImage => {
        let params: SetImageParams = request.params()?;
        let image = self.session.set_image(&self.resolver, &params.path)?;
        info!(
          "图像已设置: {} ({}x{})",
          image.path.display(),
          image.image.width(),
          image.image.height()
        );
        Ok(Some(Payload::ImageSet {
          image_path: image.path.display().to_string(),
          image_size: image.size(),
        }))
      }
      Command::Infer => {
        let params: InferParams = request.params()?;
        let options = params.options(&self.defaults);
        let prompt = params.prompt(&options);

        let start = Instant::now();
        let annotations = self.session.infer(&prompt, &options)?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        info!("推理完成: {} 个标注，耗时 {:.2} ms", annotations.len(), elapsed);

        Ok(Some(Payload::Inferred {
          annotations,
          infer_time_ms: (elapsed * 100.0).round() / 100.0,
        }))
      }
      Command::Unload => {
        self.session.unload();
        Ok(None)
      }
      Command::Shutdown => {
        self.session.unload();
        Ok(None)
      }
    }
  }
}
