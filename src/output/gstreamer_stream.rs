// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/gstreamer_stream.rs - GStreamer RTP 网络推流
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

use tracing::info;
use url::Url;

use super::gstreamer_appsrc::{AppSrcWriter, GStreamerOutputError};
use crate::detector::DetectionSet;
use crate::frame::Frame;
use crate::output::{FrameSink, OutputError, SinkSignal};
use crate::utils::{query_map, query_or};

/// 以 H.264 RTP over UDP 推送标注后的画面
///
/// `rtsp://host/live?port=8554&fps=30&bitrate=2000`；客户端按 RTP 流接收。
pub struct GStreamerStreamSink {
  host: String,
  port: u16,
  writer: AppSrcWriter,
}

impl GStreamerStreamSink {
  pub const SCHEME: &'static str = "rtsp";

  pub fn open(url: &Url) -> Result<Self, GStreamerOutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerOutputError::SchemeMismatch(url.scheme().to_string()));
    }

    let query = query_map(url);
    let fps = query_or(&query, "fps", 30u32);
    let port = url.port().unwrap_or_else(|| query_or(&query, "port", 8554u16));
    let bitrate = query_or(&query, "bitrate", 2000u32);
    let host = url.host_str().unwrap_or("0.0.0.0").to_string();

    let writer = AppSrcWriter::new(stream_description(&host, port, bitrate), fps)?;
    info!("推流目标: udp://{}:{}{}", host, port, url.path());
    Ok(Self { host, port, writer })
  }

  pub fn target(&self) -> (&str, u16) {
    (&self.host, self.port)
  }
}

pub(crate) fn stream_description(host: &str, port: u16, bitrate: u32) -> String {
  format!(
    "videoconvert ! video/x-raw,format=I420 ! \
     x264enc speed-preset=ultrafast tune=zerolatency bitrate={} ! \
     h264parse ! rtph264pay config-interval=1 pt=96 ! \
     udpsink host={} port={}",
    bitrate, host, port
  )
}

impl FrameSink for GStreamerStreamSink {
  fn present(&mut self, frame: &Frame, _detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    self.writer.push(frame)?;
    Ok(SinkSignal::Continue)
  }

  fn close(&mut self) -> Result<(), OutputError> {
    self.writer.finish()?;
    Ok(())
  }
}
