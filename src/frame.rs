// 该文件是 Shaowang （哨望） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb, RgbImage};

const RGB_CHANNELS: usize = 3;

/// 单次迭代的帧数据
///
/// 帧在一次迭代内由流水线独占：检测器只读访问，标注阶段可写访问，两者不会重叠。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  /// RGB 图像数据（HWC 排布）
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 自输入源打开以来的时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  /// 创建一个纯色帧
  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
    Self::new(ImageBuffer::from_pixel(width, height, Rgb(color)), 0, 0)
  }

  /// 从 RGB 原始字节创建帧，长度不匹配时返回 None
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    RgbImage::from_raw(width, height, data).map(|image| Self::new(image, 0, 0))
  }

  pub fn with_index(mut self, index: u64, timestamp_ms: u64) -> Self {
    self.index = index;
    self.timestamp_ms = timestamp_ms;
    self
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  /// 缩放到指定尺寸，保留帧索引与时间戳
  pub fn resized(&self, width: u32, height: u32) -> Self {
    let image = image::imageops::resize(&self.image, width, height, FilterType::Triangle);
    Self::new(image, self.index, self.timestamp_ms)
  }

  /// 转换为 NCHW 排布
  pub fn to_nchw(&self) -> Vec<u8> {
    let width = self.width() as usize;
    let height = self.height() as usize;
    let plane = width * height;
    let data = self.as_nhwc();
    let mut out = vec![0u8; plane * RGB_CHANNELS];

    for idx in 0..plane {
      for c in 0..RGB_CHANNELS {
        out[c * plane + idx] = data[idx * RGB_CHANNELS + c];
      }
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nchw_splits_channels_into_planes() {
    let frame = Frame::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(frame.to_nchw(), vec![1, 4, 2, 5, 3, 6]);
    assert_eq!(frame.channels(), 3);
  }

  #[test]
  fn resized_keeps_index_and_planes() {
    let frame = Frame::filled(8, 6, [10, 20, 30]).with_index(7, 231);
    let small = frame.resized(4, 4);
    assert_eq!((small.width(), small.height()), (4, 4));
    assert_eq!((small.index, small.timestamp_ms), (7, 231));

    let planes = small.to_nchw();
    assert_eq!(planes.len(), 4 * 4 * small.channels());
    assert!(planes[..16].iter().all(|&v| v == 10));
    assert!(planes[32..].iter().all(|&v| v == 30));
  }

  #[test]
  fn from_raw_rejects_short_buffers() {
    assert!(Frame::from_raw(4, 4, vec![0; 10]).is_none());
  }
}
