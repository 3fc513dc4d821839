// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/gstreamer_appsrc.rs - GStreamer appsrc 推流公共部分
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

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{info, warn};

use crate::frame::Frame;

#[derive(Error, Debug)]
pub enum GStreamerOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("帧尺寸变化: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeChanged { expected: (u32, u32), actual: (u32, u32) },
}

/// 以 appsrc 开头的编码管道，按首帧尺寸延迟启动
pub(crate) struct AppSrcWriter {
  description: String,
  fps: u32,
  running: Option<Running>,
  frames: u64,
}

struct Running {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  size: (u32, u32),
}

impl AppSrcWriter {
  /// `description` 为 appsrc 之后的管道描述
  pub(crate) fn new(description: String, fps: u32) -> Result<Self, GStreamerOutputError> {
    gst::init()?;
    Ok(Self {
      description,
      fps: fps.max(1),
      running: None,
      frames: 0,
    })
  }

  fn start(&self, width: u32, height: u32) -> Result<Running, GStreamerOutputError> {
    let description = format!("appsrc name=src ! {}", self.description);
    info!("创建输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerOutputError::AppSrcNotFound)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(self.fps as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_property("is-live", true);

    pipeline.set_state(gst::State::Playing)?;
    info!("输出管道已启动: {}x{} @ {} fps", width, height, self.fps);

    Ok(Running {
      pipeline,
      appsrc,
      size: (width, height),
    })
  }

  pub(crate) fn push(&mut self, frame: &Frame) -> Result<(), GStreamerOutputError> {
    let size = (frame.width(), frame.height());
    if self.running.is_none() {
      self.running = Some(self.start(size.0, size.1)?);
    }
    let Some(running) = self.running.as_ref() else {
      return Err(GStreamerOutputError::PipelineError("管道未启动".to_string()));
    };
    if running.size != size {
      return Err(GStreamerOutputError::FrameSizeChanged {
        expected: running.size,
        actual: size,
      });
    }

    let frame_ns = 1_000_000_000 / self.fps as u64;
    let mut buffer = gst::Buffer::from_slice(frame.as_nhwc().to_vec());
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerOutputError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frames * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
    }

    running
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    self.frames += 1;
    Ok(())
  }

  /// 发送 EOS 并等待管道处理完毕，重复调用无副作用
  pub(crate) fn finish(&mut self) -> Result<(), GStreamerOutputError> {
    let Some(running) = self.running.take() else {
      return Ok(());
    };

    if let Err(e) = running.appsrc.end_of_stream() {
      warn!("发送 EOS 失败: {:?}", e);
    }
    if let Some(bus) = running.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(5),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }
    running.pipeline.set_state(gst::State::Null)?;
    info!("输出管道已关闭，共写入 {} 帧", self.frames);
    Ok(())
  }
}

impl Drop for AppSrcWriter {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("关闭输出管道失败: {}", e);
    }
  }
}
