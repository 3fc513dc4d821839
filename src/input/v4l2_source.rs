// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{AcquisitionError, FrameRead, FrameSource, InputSourceType};
use crate::{frame::Frame, utils};

const V4L2_BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头输入源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Source {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Option<Pin<Box<Device>>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// 帧索引
  frame_index: u64,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 开始时间
  start_time: Instant,
}

impl V4l2Source {
  pub const SCHEME: &'static str = "v4l2";

  /// 从 `v4l2:///dev/video0` 打开摄像头
  pub fn open(url: &Url, width: u32, height: u32) -> Result<Self, AcquisitionError> {
    let device_path = utils::decoded_path(url);
    Self::new(&device_path, width, height)
  }

  /// 创建一个新的 V4L2 摄像头输入源
  pub fn new(device_path: &str, width: u32, height: u32) -> Result<Self, AcquisitionError> {
    let device_error = |source: std::io::Error| AcquisitionError::Device {
      path: device_path.to_string(),
      source,
    };

    let device = Box::pin(Device::with_path(device_path).map_err(device_error)?);

    // 设置视频格式
    let mut format = device.format().map_err(device_error)?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(device_error)?;

    if format.width != width || format.height != height {
      warn!(
        "设备不支持 {}x{}，实际格式为 {}x{}",
        width, height, format.width, format.height
      );
    }

    // 创建捕获流
    // SAFETY: device 被 Pin<Box> 固定在堆上，移动 Box 不会移动 Device；
    // stream 在 release/drop 中总是先于 device 被释放
    let stream = {
      let device_ref: &Device = &device;
      let device_static: &'static Device = unsafe { std::mem::transmute(device_ref) };
      Stream::with_buffers(device_static, Type::VideoCapture, V4L2_BUFFER_COUNT)
        .map_err(device_error)?
    };

    let source = Self {
      device: Some(device),
      stream: Some(stream),
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    info!("V4L2 设备已打开: {}", device_path);
    Ok(source)
  }

  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    self.release();
  }
}

impl FrameSource for V4l2Source {
  fn next_frame(&mut self) -> FrameRead {
    let Some(stream) = self.stream.as_mut() else {
      return FrameRead::Exhausted;
    };

    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb_data = Self::yuyv_to_rgb(buffer, self.width, self.height);
        let Some(image) = RgbImage::from_raw(self.width, self.height, rgb_data) else {
          warn!("帧数据长度不足，跳过本帧");
          return FrameRead::Miss;
        };

        let frame = Frame::new(
          image,
          self.frame_index,
          self.start_time.elapsed().as_millis() as u64,
        );
        self.frame_index += 1;
        FrameRead::Frame(frame)
      }
      Err(e)
        if matches!(
          e.kind(),
          ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
        ) =>
      {
        debug!("暂时无法捕获帧: {}", e);
        FrameRead::Miss
      }
      Err(e) => {
        error!("无法捕获帧: {}", e);
        FrameRead::Exhausted
      }
    }
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::V4l2
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn release(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    if self.device.take().is_some() {
      info!("V4L2 设备已释放");
    }
  }
}
