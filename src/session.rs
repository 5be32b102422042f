// 该文件是 Shanan Annotator （山南标注） 项目的一部分。
// src/session.rs - 模型与图像生命周期
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

use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use image::{ImageError, ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  annotation::Annotation,
  backend::{BackendError, BackendLoader, InferenceBackend, Prompt},
  geometry::ImageSize,
  postprocess::{AnnotateOptions, annotate},
};

/// 会话错误，`Display` 文本即协议中的 `error` 字段
#[derive(Error, Debug)]
pub enum SessionError {
  #[error("Model file not found: {0}")]
  ModelNotFound(String),
  #[error("Model not loaded")]
  ModelNotLoaded,
  #[error("Image not found: {0}")]
  ImageNotFound(String),
  #[error("Failed to decode image {0}: {1}")]
  ImageDecode(String, image::ImageError),
  #[error("No image set")]
  NoImageSet,
  #[error(transparent)]
  Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Unloaded,
  ModelReady,
  ImageReady,
}

/// 模型与图像路径解析
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
  data_root: Option<PathBuf>,
  plugin_dir: Option<PathBuf>,
}

// 同时接受 `/` 与 `\`
fn normalize_separators(raw: &str) -> PathBuf {
  PathBuf::from(raw.replace(['/', '\\'], &MAIN_SEPARATOR.to_string()))
}

impl PathResolver {
  pub fn new(data_root: Option<PathBuf>, plugin_dir: Option<PathBuf>) -> Self {
    Self {
      data_root,
      plugin_dir,
    }
  }

  /// 依次尝试：绝对路径、插件目录、数据根目录、当前目录
  pub fn resolve_model(&self, weights: &str) -> Result<PathBuf, SessionError> {
    if weights.trim().is_empty() {
      return Err(SessionError::ModelNotFound(weights.to_string()));
    }
    let raw = PathBuf::from(weights);
    if raw.is_absolute() {
      return if raw.exists() {
        Ok(raw)
      } else {
        Err(SessionError::ModelNotFound(weights.to_string()))
      };
    }

    for base in [&self.plugin_dir, &self.data_root].into_iter().flatten() {
      let candidate = base.join(&raw);
      if candidate.exists() {
        debug!("使用模型文件: {}", candidate.display());
        return Ok(candidate);
      }
    }

    if raw.exists() {
      return Ok(raw);
    }
    Err(SessionError::ModelNotFound(weights.to_string()))
  }

  /// 相对路径以数据根目录为基准
  pub fn resolve_image(&self, path: &str) -> PathBuf {
    let raw = normalize_separators(path);
    match &self.data_root {
      Some(root) if !raw.is_absolute() => root.join(raw),
      _ => raw,
    }
  }
}

/// 当前图像
#[derive(Debug)]
pub struct LoadedImage {
  pub path: PathBuf,
  pub image: RgbImage,
}

impl LoadedImage {
  pub fn size(&self) -> ImageSize {
    ImageSize::new(self.image.width(), self.image.height())
  }
}

/// 单个工作进程内唯一的会话
pub struct Session {
  state: SessionState,
  backend: Option<Box<dyn InferenceBackend>>,
  model_path: Option<PathBuf>,
  image: Option<LoadedImage>,
}

impl Default for Session {
  fn default() -> Self {
    Self::new()
  }
}

impl Session {
  pub fn new() -> Self {
    Self {
      state: SessionState::Unloaded,
      backend: None,
      model_path: None,
      image: None,
    }
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  pub fn model_path(&self) -> Option<&Path> {
    self.model_path.as_deref()
  }

  pub fn image(&self) -> Option<&LoadedImage> {
    self.image.as_ref()
  }

  pub fn device(&self) -> Option<&str> {
    self.backend.as_ref().map(|b| b.device())
  }

  /// 加载模型，任意状态均可调用
  ///
  /// 已设置的图像会保留，但状态回到 `ModelReady`，需重新 `set_image` 才能推理。
  pub fn load_model<L: BackendLoader + ?Sized>(
    &mut self,
    loader: &L,
    resolver: &PathResolver,
    weights: &str,
  ) -> Result<&Path, SessionError> {
    let path = resolver.resolve_model(weights)?;
    info!("加载模型: {}", path.display());
    let backend = loader.load(&path).map_err(BackendError::into_actionable)?;
    info!("模型加载完成，设备: {}", backend.device());

    if let Some(image) = &self.image {
      warn!(
        "重新加载模型后需要重新设置图像，当前图像 {} 暂不可用于推理",
        image.path.display()
      );
    }

    self.backend = Some(backend);
    self.state = SessionState::ModelReady;
    Ok(self.model_path.insert(path))
  }

  /// 设置当前图像
  pub fn set_image(
    &mut self,
    resolver: &PathResolver,
    path: &str,
  ) -> Result<&LoadedImage, SessionError> {
    let Some(backend) = self.backend.as_mut() else {
      return Err(SessionError::ModelNotLoaded);
    };

    let resolved = resolver.resolve_image(path);
    if !resolved.exists() {
      return Err(SessionError::ImageNotFound(resolved.display().to_string()));
    }
    // 按文件内容而不是扩展名选择解码器
    let image = ImageReader::open(&resolved)
      .and_then(|reader| reader.with_guessed_format())
      .map_err(ImageError::IoError)
      .and_then(|reader| reader.decode())
      .map_err(|e| SessionError::ImageDecode(resolved.display().to_string(), e))?
      .to_rgb8();
    debug!(
      "图像已解码: {} ({}x{})",
      resolved.display(),
      image.width(),
      image.height()
    );

    backend.set_image(&image)?;
    self.state = SessionState::ImageReady;
    Ok(self.image.insert(LoadedImage {
      path: resolved,
      image,
    }))
  }

  /// 在当前图像上推理，不改变状态
  pub fn infer(
    &mut self,
    prompt: &Prompt,
    options: &AnnotateOptions,
  ) -> Result<Vec<Annotation>, SessionError> {
    match self.state {
      SessionState::Unloaded => return Err(SessionError::ModelNotLoaded),
      SessionState::ModelReady => return Err(SessionError::NoImageSet),
      SessionState::ImageReady => {}
    }
    let (Some(backend), Some(image)) = (self.backend.as_mut(), self.image.as_ref()) else {
      return Err(SessionError::NoImageSet);
    };

    if prompt.is_empty() {
      debug!("没有提示点或提示框，返回空结果");
      return Ok(Vec::new());
    }

    let size = image.size();
    let output = backend.predict(&prompt.to_pixels(size))?;
    debug!("后端输出 {} 个候选", output.len());
    Ok(annotate(output, size, options))
  }

  /// 释放模型与图像，总是成功
  pub fn unload(&mut self) {
    if self.backend.is_some() {
      info!("释放模型");
    }
    self.backend = None;
    self.model_path = None;
    self.image = None;
    self.state = SessionState::Unloaded;
  }
}
