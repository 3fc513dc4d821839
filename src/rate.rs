// 该文件是 Shaowang （哨望） 项目的一部分。
// src/rate.rs - 处理帧率统计
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

/// 处理帧率统计：累计帧数 / 自启动以来经过的秒数
///
/// 在流水线初始化时创建，会话内不重置。
#[derive(Debug, Clone)]
pub struct RateTracker {
  started: Instant,
  frames: u64,
  last_rate: f64,
}

impl Default for RateTracker {
  fn default() -> Self {
    Self::new()
  }
}

impl RateTracker {
  pub fn new() -> Self {
    Self::starting_at(Instant::now())
  }

  pub fn starting_at(started: Instant) -> Self {
    Self {
      started,
      frames: 0,
      last_rate: 0.0,
    }
  }

  /// 记录一帧并返回当前帧率
  pub fn tick(&mut self) -> f64 {
    self.tick_at(Instant::now())
  }

  /// 以给定时刻记录一帧；经过时间为零时返回上一次的有效帧率
  pub fn tick_at(&mut self, now: Instant) -> f64 {
    self.frames += 1;
    let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
    if elapsed > 0.0 {
      self.last_rate = self.frames as f64 / elapsed;
    }
    self.last_rate
  }

  pub fn frames(&self) -> u64 {
    self.frames
  }

  /// 最近一次计算出的帧率
  pub fn rate(&self) -> f64 {
    self.last_rate
  }
}
