// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录检测帧
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

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::DetectionSet,
  frame::Frame,
  output::{FrameSink, OutputError, SinkSignal},
  utils::{decoded_path, query_flag, query_map},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按 `年/月/日` 目录保存检测帧
///
/// 默认只保存包含检测结果的帧，`always` 时保存每一帧；`record` 时在图像旁
/// 写入同名 JSON 检测记录。
pub struct DirectoryRecordSink {
  directory: PathBuf,
  record: bool,
  always: bool,
  counter: u32,
  saved: u64,
}

impl FromUrlWithScheme for DirectoryRecordSink {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordSink {
  type Error = DirectoryRecordError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordError::SchemeMismatch);
    }

    let query = query_map(uri);
    Ok(
      Self::new(decoded_path(uri))
        .record(query_flag(&query, "record"))
        .always(query_flag(&query, "always")),
    )
  }
}

impl DirectoryRecordSink {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      record: false,
      always: false,
      counter: 0,
      saved: 0,
    }
  }

  pub fn record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&mut self) -> u32 {
    self.counter = self.counter.wrapping_add(1);
    self.counter
  }

  fn frame_path(&mut self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let id = self.frame_id();
    Ok(directory.join(format!("{}-{:04X}.png", now.format("%H-%M-%S"), id)))
  }

  fn save(
    &mut self,
    now: DateTime<Utc>,
    frame: &Frame,
    detections: &DetectionSet,
  ) -> Result<Option<PathBuf>, DirectoryRecordError> {
    if !self.always && detections.is_empty() {
      return Ok(None);
    }

    let path = self.frame_path(now)?;
    frame.image.save(&path)?;

    if self.record {
      let record = detections.to_json(frame);
      std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;
    }

    self.saved += 1;
    debug!("记录帧 {} 到 {}", frame.index, path.display());
    Ok(Some(path))
  }
}

impl FrameSink for DirectoryRecordSink {
  fn present(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    self.save(Utc::now(), frame, detections)?;
    Ok(SinkSignal::Continue)
  }

  fn close(&mut self) -> Result<(), OutputError> {
    if self.saved > 0 {
      info!("目录记录结束，共保存 {} 帧: {}", self.saved, self.directory.display());
      self.saved = 0;
    }
    Ok(())
  }
}
