// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/gstreamer_source.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 支持两类 URL：
//!
//! - `gst://camera/dev/video0?fps=15&format=YUY2&io-mode=2&rotate=90`
//! - `gst://file/path/to/video.mp4?rotate=180`
//!
//! 管道末端统一缩放并转换为 RGB，交给 appsink 输出。

use std::collections::HashMap;
use std::time::Instant;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{FrameRead, FrameSource, InputSourceType};
use crate::{frame::Frame, utils};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerSourceError {
  /// URI 主机既不是 camera 也不是 file
  #[error("Unsupported GStreamer source kind: {0}")]
  UnsupportedKind(String),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
  Scale {
    width: u32,
    height: u32,
  },
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location=\"{}\" ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::Scale { width, height } => format!(
        "videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={}",
        width, height
      ),
    }
  }

  fn video_flip(rotate: Option<&String>) -> Option<PipelineItem> {
    let method = match rotate.map(String::as_str) {
      Some("90") => 1,
      Some("180") => 2,
      Some("270") => 3,
      _ => return None,
    };
    Some(PipelineItem::VideoFlip { method })
  }
}

fn describe_pipeline(
  url: &Url,
  width: u32,
  height: u32,
) -> Result<String, GStreamerSourceError> {
  let query: HashMap<String, String> = utils::query_map(url);
  let path = utils::decoded_path(url);

  let mut items = Vec::new();
  match url.host_str() {
    Some("camera") => items.push(PipelineItem::CameraSource {
      camera: path,
      io_mode: query.get("io-mode").and_then(|v| v.parse().ok()),
      format: query.get("format").cloned().unwrap_or_else(|| "YUY2".to_string()),
      width: utils::query_or(&query, "width", width),
      height: utils::query_or(&query, "height", height),
      fps: utils::query_or(&query, "fps", 15),
    }),
    Some("file") => items.push(PipelineItem::FileSource(path)),
    other => {
      return Err(GStreamerSourceError::UnsupportedKind(
        other.unwrap_or_default().to_string(),
      ));
    }
  }

  if let Some(flip) = PipelineItem::video_flip(query.get("rotate")) {
    items.push(flip);
  }
  items.push(PipelineItem::Scale { width, height });

  let basic_pipeline = items
    .iter()
    .map(PipelineItem::to_pipeline)
    .collect::<Vec<String>>()
    .join(" ! ");
  Ok(format!(
    "{} ! appsink max-buffers=2 drop=true name=sink",
    basic_pipeline
  ))
}

/// GStreamer 视频输入
pub struct GStreamerSource {
  pipeline: Option<gst::Pipeline>,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl GStreamerSource {
  pub const SCHEME: &'static str = "gst";

  pub fn open(url: &Url, width: u32, height: u32) -> Result<Self, GStreamerSourceError> {
    gst::init()?;

    let description = describe_pipeline(url, width, height)?;
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerSourceError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerSourceError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerSourceError::AppSinkNotFound)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline: Some(pipeline),
      appsink,
      width,
      height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }

  fn convert_sample(&self, sample: gst::Sample) -> Result<RgbImage, GStreamerSourceError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| GStreamerSourceError::PipelineError("No buffer in sample".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerSourceError::PipelineError("No caps in sample".to_string()))?;
    let video_info = gst_video::VideoInfo::from_caps(caps)
      .map_err(|_| GStreamerSourceError::PipelineError("Invalid caps".to_string()))?;

    if video_info.format() != gst_video::VideoFormat::Rgb {
      return Err(GStreamerSourceError::UnsupportedFormat);
    }

    let width = video_info.width() as usize;
    let height = video_info.height() as usize;
    let stride = video_info.stride()[0] as usize;

    let map = buffer.map_readable().map_err(|e| {
      GStreamerSourceError::PipelineError(format!("Failed to map buffer for reading: {}", e))
    })?;
    let data = map.as_slice();

    let expected = stride * height;
    if data.len() < expected {
      return Err(GStreamerSourceError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    // 逐行拷贝以去掉行尾对齐填充
    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in data.chunks(stride).take(height) {
      rgb.extend_from_slice(&row[..width * 3]);
    }

    RgbImage::from_raw(width as u32, height as u32, rgb).ok_or(
      GStreamerSourceError::BufferSizeMismatch {
        expected: width * height * 3,
        actual: 0,
      },
    )
  }
}

impl FrameSource for GStreamerSource {
  fn next_frame(&mut self) -> FrameRead {
    if self.pipeline.is_none() {
      return FrameRead::Exhausted;
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(e) => {
        if self.appsink.is_eos() {
          info!("GStreamer 输入流结束");
        } else {
          error!("Failed to pull sample: {}", e);
        }
        return FrameRead::Exhausted;
      }
    };

    match self.convert_sample(sample) {
      Ok(image) => {
        let frame = Frame::new(
          image,
          self.frame_index,
          self.start_time.elapsed().as_millis() as u64,
        );
        self.frame_index += 1;
        FrameRead::Frame(frame)
      }
      Err(e) => {
        warn!("Failed to convert sample: {}", e);
        FrameRead::Miss
      }
    }
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::GStreamer
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn release(&mut self) {
    if let Some(pipeline) = self.pipeline.take() {
      if let Err(e) = pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
      debug!("GStreamer 输入管道已停止");
    }
  }
}

impl Drop for GStreamerSource {
  fn drop(&mut self) {
    self.release();
  }
}
