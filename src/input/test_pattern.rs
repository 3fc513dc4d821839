// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/test_pattern.rs - 测试图案输入源
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

use image::{ImageBuffer, Rgb};
use url::Url;

use super::{FrameRead, FrameSource, InputSourceType};
use crate::{frame::Frame, utils};

/// 测试图案输入源，生成水平滚动的渐变帧
///
/// `frames` 参数为 0 时无限输出。
pub struct TestPatternSource {
  width: u32,
  height: u32,
  limit: u64,
  frame_index: u64,
  start_time: Instant,
  released: bool,
}

impl TestPatternSource {
  pub const SCHEME: &'static str = "test";

  pub fn open(url: &Url, width: u32, height: u32) -> Self {
    let query = utils::query_map(url);
    Self::new(width, height, utils::query_or(&query, "frames", 0))
  }

  pub fn new(width: u32, height: u32, limit: u64) -> Self {
    Self {
      width,
      height,
      limit,
      frame_index: 0,
      start_time: Instant::now(),
      released: false,
    }
  }
}

impl FrameSource for TestPatternSource {
  fn next_frame(&mut self) -> FrameRead {
    if self.released || (self.limit > 0 && self.frame_index >= self.limit) {
      return FrameRead::Exhausted;
    }

    let (width, height) = (self.width.max(1), self.height.max(1));
    let shift = (self.frame_index % width as u64) as u32;
    let image = ImageBuffer::from_fn(width, height, |x, y| {
      let r = (((x + shift) % width) * 255 / width) as u8;
      let g = (y * 255 / height) as u8;
      Rgb([r, g, 128])
    });

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    FrameRead::Frame(frame)
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::TestPattern
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn release(&mut self) {
    self.released = true;
  }
}
