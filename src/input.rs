// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::frame::Frame;

#[cfg(feature = "read_image_file")]
mod image_source;
#[cfg(feature = "read_image_file")]
pub use self::image_source::ImageSource;

#[cfg(feature = "v4l2_input")]
mod v4l2_source;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_source::V4l2Source;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_source;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_source::{GStreamerSource, GStreamerSourceError};

mod test_pattern;
pub use self::test_pattern::TestPatternSource;

/// 单次取帧的结果
///
/// 读取失败不会以错误形式抛出，而是区分为瞬时丢帧与流结束两种信号。
#[derive(Debug)]
pub enum FrameRead {
  /// 成功获取一帧
  Frame(Frame),
  /// 瞬时丢帧，下个周期重试
  Miss,
  /// 输入已耗尽或不可用
  Exhausted,
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSourceType {
  /// 图片文件
  Image,
  /// V4L2 摄像头
  V4l2,
  /// GStreamer 管道
  GStreamer,
  /// 测试图案
  TestPattern,
}

/// 输入源 trait
///
/// 帧序列只能通过重新打开输入源来重启；调用方不应假设相邻两帧共享缓冲区。
pub trait FrameSource {
  /// 获取下一帧
  fn next_frame(&mut self) -> FrameRead;

  /// 获取输入源类型
  fn source_type(&self) -> InputSourceType;

  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 释放设备资源，重复调用无副作用
  fn release(&mut self);
}

#[derive(Error, Debug)]
pub enum AcquisitionError {
  #[error("不支持的输入方案: {0}")]
  SchemeMismatch(String),
  #[error("无效的帧尺寸: {width}x{height}")]
  InvalidSize { width: u32, height: u32 },
  #[cfg(feature = "read_image_file")]
  #[error("无法读取图片 {path}: {source}")]
  Image {
    path: String,
    #[source]
    source: image::ImageError,
  },
  #[error("无法打开设备 {path}: {source}")]
  Device {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamer(#[from] GStreamerSourceError),
}

/// 根据 URL 打开输入源
///
/// 支持的方案：
/// - `image:///path/to/image.png?repeat=N`
/// - `v4l2:///dev/video0`
/// - `gst://camera/dev/video0?fps=15` 或 `gst://file/path/to/video.mp4`
/// - `test://pattern?frames=N`
pub fn open_source(
  url: &Url,
  width: u32,
  height: u32,
) -> Result<Box<dyn FrameSource>, AcquisitionError> {
  if width == 0 || height == 0 {
    return Err(AcquisitionError::InvalidSize { width, height });
  }

  info!("打开输入源: {} ({}x{})", url, width, height);
  let source: Box<dyn FrameSource> = match url.scheme() {
    #[cfg(feature = "read_image_file")]
    ImageSource::SCHEME => Box::new(ImageSource::open(url, width, height)?),
    #[cfg(feature = "v4l2_input")]
    V4l2Source::SCHEME => Box::new(V4l2Source::open(url, width, height)?),
    #[cfg(feature = "gstreamer_input")]
    GStreamerSource::SCHEME => Box::new(GStreamerSource::open(url, width, height)?),
    TestPatternSource::SCHEME => Box::new(TestPatternSource::open(url, width, height)),
    other => {
      error!("不支持的输入方案: {}", other);
      return Err(AcquisitionError::SchemeMismatch(other.to_string()));
    }
  };

  info!(
    "输入源已打开: {}x{} {:?}",
    source.width(),
    source.height(),
    source.source_type()
  );
  Ok(source)
}
