// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/detection_export.rs - 检测结果 JSON Lines 导出
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

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::detector::DetectionSet;
use crate::frame::Frame;
use crate::output::{FrameSink, OutputError, SinkSignal};
use crate::utils::{decoded_path, query_flag, query_map};

#[derive(Error, Debug)]
pub enum DetectionExportError {
  #[error("无法打开导出文件 {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("写入导出文件失败: {0}")]
  Write(#[from] std::io::Error),
  #[error("JSON 序列化失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 每帧写入一行 JSON 记录
///
/// `jsonl:///path/detections.jsonl[?append][&skip_empty]`
pub struct DetectionExportSink {
  path: PathBuf,
  writer: Option<BufWriter<File>>,
  skip_empty: bool,
  records: u64,
}

impl DetectionExportSink {
  pub const SCHEME: &'static str = "jsonl";

  pub fn open(url: &Url) -> Result<Self, DetectionExportError> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectionExportError::SchemeMismatch(url.scheme().to_string()));
    }
    let query = query_map(url);
    let sink = Self::create(decoded_path(url), query_flag(&query, "append"))?;
    Ok(sink.skip_empty(query_flag(&query, "skip_empty")))
  }

  pub fn create(path: impl Into<PathBuf>, append: bool) -> Result<Self, DetectionExportError> {
    let path = path.into();
    let open_error = |source| DetectionExportError::Open {
      path: path.display().to_string(),
      source,
    };

    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(open_error)?;
      }
    }

    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .append(append)
      .truncate(!append)
      .open(&path)
      .map_err(open_error)?;

    info!("检测结果导出到: {}", path.display());
    Ok(Self {
      path,
      writer: Some(BufWriter::new(file)),
      skip_empty: false,
      records: 0,
    })
  }

  pub fn skip_empty(mut self, skip_empty: bool) -> Self {
    self.skip_empty = skip_empty;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn write_record(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<(), DetectionExportError> {
    if self.skip_empty && detections.is_empty() {
      return Ok(());
    }
    let Some(writer) = self.writer.as_mut() else {
      return Ok(());
    };

    serde_json::to_writer(&mut *writer, &detections.to_json(frame))?;
    writer.write_all(b"\n")?;
    self.records += 1;
    Ok(())
  }
}

impl FrameSink for DetectionExportSink {
  fn present(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    self.write_record(frame, detections)?;
    Ok(SinkSignal::Continue)
  }

  fn close(&mut self) -> Result<(), OutputError> {
    if let Some(mut writer) = self.writer.take() {
      writer.flush().map_err(DetectionExportError::from)?;
      info!("检测结果导出完成，共 {} 条记录: {}", self.records, self.path.display());
    }
    Ok(())
  }
}

impl Drop for DetectionExportSink {
  fn drop(&mut self) {
    let _ = self.close();
  }
}
