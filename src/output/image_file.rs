// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/image_file.rs - 保存最新标注图像
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::DetectionSet,
  frame::Frame,
  output::{FrameSink, OutputError, SinkSignal},
  utils::{decoded_path, query_flag, query_map},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 每帧覆盖写入同一个图像文件；`once` 模式下写入一次后要求停止
pub struct ImageFileSink {
  path: PathBuf,
  once: bool,
  saved: u64,
}

impl FromUrlWithScheme for ImageFileSink {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSink {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let query = query_map(uri);
    Ok(Self::new(decoded_path(uri)).once(query_flag(&query, "once")))
  }
}

impl ImageFileSink {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      once: false,
      saved: 0,
    }
  }

  pub fn once(mut self, once: bool) -> Self {
    self.once = once;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: &image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    image.save(&self.path)?;
    debug!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl FrameSink for ImageFileSink {
  fn present(&mut self, frame: &Frame, _detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    self.save_image(&frame.image)?;
    self.saved += 1;

    if self.once {
      info!("已保存单帧图像: {}", self.path.display());
      Ok(SinkSignal::Stop)
    } else {
      Ok(SinkSignal::Continue)
    }
  }

  fn close(&mut self) -> Result<(), OutputError> {
    if self.saved > 0 {
      info!("图像输出结束，共写入 {} 次: {}", self.saved, self.path.display());
      self.saved = 0;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_latest_frame_and_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("latest.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();

    let mut sink = ImageFileSink::from_url(&url).unwrap();
    let frame = Frame::filled(8, 6, [200, 10, 10]);
    let signal = sink.present(&frame, &DetectionSet::default()).unwrap();
    assert_eq!(signal, SinkSignal::Continue);

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (8, 6));
    assert_eq!(saved.get_pixel(3, 3).0, [200, 10, 10]);
  }

  #[test]
  fn once_mode_requests_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = ImageFileSink::new(dir.path().join("shot.png")).once(true);
    let frame = Frame::filled(4, 4, [0, 0, 0]);
    assert_eq!(
      sink.present(&frame, &DetectionSet::default()).unwrap(),
      SinkSignal::Stop
    );
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      ImageFileSink::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
