// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output.rs - 输出定义
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

//! 输出端
//!
//! 标注完成的帧交给 [`FrameSink`]，每次迭代返回 [`SinkSignal`] 决定是否继续。
//! 输出端通过 URL 构造，方案决定具体实现。

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::detector::DetectionSet;
use crate::frame::Frame;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::{FromUrl, FromUrlWithScheme};

mod detection_export;
pub use self::detection_export::{DetectionExportError, DetectionExportSink};

#[cfg(feature = "save_image_file")]
mod image_file;
#[cfg(feature = "save_image_file")]
pub use self::image_file::{ImageFileSink, SaveImageFileError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordError, DirectoryRecordSink};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_appsrc;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_appsrc::GStreamerOutputError;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video::GStreamerVideoSink;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_stream;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_stream::GStreamerStreamSink;

/// 每次输出后的控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkSignal {
  Continue,
  Stop,
}

impl SinkSignal {
  pub fn is_stop(self) -> bool {
    self == SinkSignal::Stop
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFile(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecord(#[from] DirectoryRecordError),
  #[error("检测结果导出错误: {0}")]
  DetectionExport(#[from] DetectionExportError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 输出错误: {0}")]
  GStreamer(#[from] GStreamerOutputError),
  #[error("不支持的输出方案: {0}")]
  SchemeMismatch(String),
}

/// 输出端
pub trait FrameSink {
  /// 输出一帧已标注的画面及其检测结果
  fn present(&mut self, frame: &Frame, detections: &DetectionSet)
  -> Result<SinkSignal, OutputError>;

  /// 结束输出并释放资源，重复调用无副作用
  fn close(&mut self) -> Result<(), OutputError> {
    Ok(())
  }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn present(
    &mut self,
    frame: &Frame,
    detections: &DetectionSet,
  ) -> Result<SinkSignal, OutputError> {
    (**self).present(frame, detections)
  }

  fn close(&mut self) -> Result<(), OutputError> {
    (**self).close()
  }
}

/// 丢弃全部输出
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NullSink {
  pub const SCHEME: &'static str = "null";
}

impl FrameSink for NullSink {
  fn present(&mut self, _frame: &Frame, _detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    Ok(SinkSignal::Continue)
  }
}

/// 将同一帧分发给多个输出端，任一输出端要求停止即停止
#[derive(Default)]
pub struct MultiSink {
  sinks: Vec<Box<dyn FrameSink>>,
}

impl MultiSink {
  pub fn new(sinks: Vec<Box<dyn FrameSink>>) -> Self {
    Self { sinks }
  }

  pub fn push(&mut self, sink: Box<dyn FrameSink>) {
    self.sinks.push(sink);
  }

  pub fn len(&self) -> usize {
    self.sinks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sinks.is_empty()
  }
}

impl FrameSink for MultiSink {
  fn present(
    &mut self,
    frame: &Frame,
    detections: &DetectionSet,
  ) -> Result<SinkSignal, OutputError> {
    let mut signal = SinkSignal::Continue;
    for sink in &mut self.sinks {
      if sink.present(frame, detections)?.is_stop() {
        signal = SinkSignal::Stop;
      }
    }
    Ok(signal)
  }

  // 全部输出端都会被关闭，返回第一个错误
  fn close(&mut self) -> Result<(), OutputError> {
    let mut first_error = None;
    for sink in &mut self.sinks {
      if let Err(e) = sink.close() {
        warn!("关闭输出端失败: {}", e);
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }
}

/// 根据 URL 打开输出端
///
/// 支持的方案：
/// - `image:///path/latest.png[?once]`
/// - `folder:///path/records[?record][&always]`
/// - `jsonl:///path/detections.jsonl`
/// - `gst:///path/out.mp4?fps=30`（需要 `gstreamer_output` 特性）
/// - `rtsp://host/live?port=8554`（需要 `gstreamer_output` 特性）
/// - `null://`
pub fn open_sink(url: &Url) -> Result<Box<dyn FrameSink>, OutputError> {
  info!("打开输出端: {}", url);
  match url.scheme() {
    NullSink::SCHEME => Ok(Box::new(NullSink)),
    DetectionExportSink::SCHEME => Ok(Box::new(DetectionExportSink::open(url)?)),
    #[cfg(feature = "save_image_file")]
    ImageFileSink::SCHEME => Ok(Box::new(ImageFileSink::from_url(url)?)),
    #[cfg(feature = "directory_record")]
    DirectoryRecordSink::SCHEME => Ok(Box::new(DirectoryRecordSink::from_url(url)?)),
    #[cfg(feature = "gstreamer_output")]
    GStreamerVideoSink::SCHEME => Ok(Box::new(GStreamerVideoSink::open(url)?)),
    #[cfg(feature = "gstreamer_output")]
    GStreamerStreamSink::SCHEME => Ok(Box::new(GStreamerStreamSink::open(url)?)),
    other => Err(OutputError::SchemeMismatch(other.to_string())),
  }
}

/// 打开多个输出端；没有输出端时使用 [`NullSink`]
pub fn open_sinks(urls: &[Url]) -> Result<Box<dyn FrameSink>, OutputError> {
  open_sinks_with(urls, open_sink)
}

// 任一输出端打开失败时，先关闭已打开的输出端再返回错误
fn open_sinks_with<F>(urls: &[Url], mut open: F) -> Result<Box<dyn FrameSink>, OutputError>
where
  F: FnMut(&Url) -> Result<Box<dyn FrameSink>, OutputError>,
{
  match urls {
    [] => Ok(Box::new(NullSink)),
    [url] => open(url),
    urls => {
      let mut multi = MultiSink::default();
      for url in urls {
        match open(url) {
          Ok(sink) => multi.push(sink),
          Err(e) => {
            if let Err(close_err) = multi.close() {
              warn!("回收已打开的输出端失败: {}", close_err);
            }
            return Err(e);
          }
        }
      }
      Ok(Box::new(multi))
    }
  }
}
