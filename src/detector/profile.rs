// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector/profile.rs - 内置检测器标签预设
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

use std::fmt;
use std::str::FromStr;

/// 内置的检测器标签预设
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorProfile {
  FireSmoke,
  Weapon,
  Mask,
  General,
  Violence,
}

impl DetectorProfile {
  pub const ALL: [DetectorProfile; 5] = [
    DetectorProfile::FireSmoke,
    DetectorProfile::Weapon,
    DetectorProfile::Mask,
    DetectorProfile::General,
    DetectorProfile::Violence,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      DetectorProfile::FireSmoke => "fire_smoke",
      DetectorProfile::Weapon => "weapon",
      DetectorProfile::Mask => "mask",
      DetectorProfile::General => "general",
      DetectorProfile::Violence => "violence",
    }
  }

  /// 预设标签，按模型类别索引排列
  pub fn labels(&self) -> &'static [&'static str] {
    match self {
      DetectorProfile::FireSmoke => &["fire", "smoke"],
      DetectorProfile::Weapon => &["weapon"],
      DetectorProfile::Mask => &["masked", "unmasked"],
      // 训练数据中 0 与 2 同为 masked，保持原样
      DetectorProfile::General => &["masked", "person", "masked"],
      DetectorProfile::Violence => &["normal", "violence"],
    }
  }
}

impl FromStr for DetectorProfile {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    DetectorProfile::ALL
      .into_iter()
      .find(|p| p.name() == s)
      .ok_or_else(|| format!("未知的检测器预设: {}", s))
  }
}

impl fmt::Display for DetectorProfile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}
