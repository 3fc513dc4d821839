// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/image_source.rs - 图片输入源
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

use std::time::Instant;

use image::{ImageReader, RgbImage, imageops::FilterType};
use tracing::{debug, info};
use url::Url;

use super::{AcquisitionError, FrameRead, FrameSource, InputSourceType};
use crate::{frame::Frame, utils};

/// 图片输入源
///
/// 将单张图片按 `repeat` 次数重复输出，之后返回耗尽信号。
pub struct ImageSource {
  /// 图片数据
  image: Option<RgbImage>,
  /// 剩余输出次数
  remaining: u64,
  /// 帧索引
  frame_index: u64,
  /// 图片宽度
  width: u32,
  /// 图片高度
  height: u32,
  /// 开始时间
  start_time: Instant,
}

impl ImageSource {
  pub const SCHEME: &'static str = "image";

  /// 从 `image:///path?repeat=N` 打开图片，尺寸不一致时缩放到请求尺寸
  pub fn open(url: &Url, width: u32, height: u32) -> Result<Self, AcquisitionError> {
    let path = utils::decoded_path(url);
    let query = utils::query_map(url);
    let repeat = utils::query_or(&query, "repeat", 1u64).max(1);

    let image = ImageReader::open(&path)
      .map_err(|e| AcquisitionError::Device {
        path: path.clone(),
        source: e,
      })?
      .decode()
      .map_err(|e| AcquisitionError::Image {
        path: path.clone(),
        source: e,
      })?
      .to_rgb8();

    Ok(Self::from_image(image, width, height, repeat))
  }

  pub fn from_image(image: RgbImage, width: u32, height: u32, repeat: u64) -> Self {
    let image = if image.dimensions() != (width, height) {
      info!(
        "图片尺寸 {}x{} 与请求尺寸 {}x{} 不一致，进行缩放",
        image.width(),
        image.height(),
        width,
        height
      );
      image::imageops::resize(&image, width, height, FilterType::Triangle)
    } else {
      image
    };

    Self {
      image: Some(image),
      remaining: repeat,
      frame_index: 0,
      width,
      height,
      start_time: Instant::now(),
    }
  }
}

impl FrameSource for ImageSource {
  fn next_frame(&mut self) -> FrameRead {
    if self.remaining == 0 {
      return FrameRead::Exhausted;
    }
    let Some(image) = self.image.as_ref() else {
      return FrameRead::Exhausted;
    };

    self.remaining -= 1;
    let image = if self.remaining == 0 {
      self.image.take().unwrap_or_default()
    } else {
      image.clone()
    };

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    FrameRead::Frame(frame)
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::Image
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn release(&mut self) {
    if self.image.take().is_some() {
      debug!("释放图片缓冲区");
    }
    self.remaining = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn repeats_then_exhausts() {
    let image = RgbImage::new(8, 8);
    let mut source = ImageSource::from_image(image, 8, 8, 3);
    for expected in 0..3 {
      match source.next_frame() {
        FrameRead::Frame(frame) => assert_eq!(frame.index, expected),
        other => panic!("unexpected read: {:?}", other),
      }
    }
    assert!(matches!(source.next_frame(), FrameRead::Exhausted));
  }

  #[test]
  fn resizes_to_requested_size() {
    let mut source = ImageSource::from_image(RgbImage::new(16, 8), 4, 2, 1);
    let FrameRead::Frame(frame) = source.next_frame() else {
      panic!("expected a frame");
    };
    assert_eq!((frame.width(), frame.height()), (4, 2));
  }

  #[test]
  fn open_reads_file_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    RgbImage::new(10, 6).save(&path).unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();

    let mut source = ImageSource::open(&url, 10, 6).unwrap();
    assert!(matches!(source.next_frame(), FrameRead::Frame(_)));
    source.release();
    assert!(matches!(source.next_frame(), FrameRead::Exhausted));
  }

  #[test]
  fn missing_file_fails_to_open() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(ImageSource::open(&url, 4, 4).is_err());
  }
}
