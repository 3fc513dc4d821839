// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/gstreamer_video.rs - GStreamer 视频文件输出
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

//! 将标注后的帧编码为视频文件
//!
//! `gst:///path/to/output.mp4?fps=30`，容器由扩展名决定：
//! `.mp4`、`.mkv`、`.avi` 使用 H.264，`.webm` 使用 VP8，其他扩展名按 MP4 处理。

use url::Url;

use super::gstreamer_appsrc::{AppSrcWriter, GStreamerOutputError};
use crate::detector::DetectionSet;
use crate::frame::Frame;
use crate::output::{FrameSink, OutputError, SinkSignal};
use crate::utils::{decoded_path, query_map, query_or};

pub struct GStreamerVideoSink {
  path: String,
  writer: AppSrcWriter,
}

impl GStreamerVideoSink {
  pub const SCHEME: &'static str = "gst";

  pub fn open(url: &Url) -> Result<Self, GStreamerOutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    let fps = query_or(&query_map(url), "fps", 30u32);
    let path = decoded_path(url);
    let writer = AppSrcWriter::new(encoder_description(&path), fps)?;
    Ok(Self { path, writer })
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

/// appsrc 之后的编码与封装管道
pub(crate) fn encoder_description(path: &str) -> String {
  let h264 = "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse";
  let lower = path.to_ascii_lowercase();
  let tail = if lower.ends_with(".mkv") {
    format!("{} ! matroskamux", h264)
  } else if lower.ends_with(".avi") {
    format!("{} ! avimux", h264)
  } else if lower.ends_with(".webm") {
    "videoconvert ! vp8enc deadline=1 ! webmmux".to_string()
  } else {
    format!("{} ! mp4mux", h264)
  };
  format!("{} ! filesink location=\"{}\"", tail, path)
}

impl FrameSink for GStreamerVideoSink {
  fn present(&mut self, frame: &Frame, _detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    self.writer.push(frame)?;
    Ok(SinkSignal::Continue)
  }

  fn close(&mut self) -> Result<(), OutputError> {
    self.writer.finish()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_follows_extension() {
    assert!(encoder_description("/tmp/a.mp4").contains("mp4mux"));
    assert!(encoder_description("/tmp/a.MKV").contains("matroskamux"));
    assert!(encoder_description("/tmp/a.webm").contains("vp8enc"));
    assert!(encoder_description("/tmp/a.bin").contains("mp4mux"));
    assert!(encoder_description("/tmp/my video.avi").ends_with("location=\"/tmp/my video.avi\""));
  }
}
