// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector/labels.rs - 标签集
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

use std::collections::BTreeMap;

/// 检测器的固定标签集，类别索引到标签名的显式映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  labels: Box<[String]>,
}

impl LabelSet {
  /// 创建标签集，拒绝空集与空白标签
  pub fn new<I, S>(labels: I) -> Result<Self, String>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels: Vec<String> = labels
      .into_iter()
      .map(|s| Into::<String>::into(s).trim().to_string())
      .collect();

    if labels.is_empty() {
      return Err("标签集为空".to_string());
    }
    if let Some(idx) = labels.iter().position(String::is_empty) {
      return Err(format!("第 {} 个标签为空", idx));
    }

    Ok(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  /// 按类别索引查找标签，越界时返回 None
  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }

  /// 标签集内部重复出现的标签名
  pub fn duplicates(&self) -> Vec<&str> {
    let mut seen = BTreeMap::<&str, usize>::new();
    for label in self.iter() {
      *seen.entry(label).or_default() += 1;
    }
    seen
      .into_iter()
      .filter(|(_, count)| *count > 1)
      .map(|(label, _)| label)
      .collect()
  }
}

/// 多个检测器共用的标签名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLabel {
  pub label: String,
  pub detectors: Vec<String>,
}

/// 找出在多个检测器标签集中同名出现的标签，只做标记，不合并
pub fn shared_labels<'a>(sets: impl IntoIterator<Item = (&'a str, &'a LabelSet)>) -> Vec<SharedLabel> {
  let mut owners = BTreeMap::<&str, Vec<String>>::new();
  for (detector, labels) in sets {
    for label in labels.iter() {
      let entry = owners.entry(label).or_default();
      if !entry.iter().any(|d| d == detector) {
        entry.push(detector.to_string());
      }
    }
  }

  owners
    .into_iter()
    .filter(|(_, detectors)| detectors.len() > 1)
    .map(|(label, detectors)| SharedLabel {
      label: label.to_string(),
      detectors,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lookup_is_bounds_checked() {
    let labels = LabelSet::new(["fire", "smoke"]).unwrap();
    assert_eq!(labels.get(0), Some("fire"));
    assert_eq!(labels.get(1), Some("smoke"));
    assert_eq!(labels.get(2), None);
    assert_eq!(labels.get(u32::MAX), None);
  }

  #[test]
  fn empty_sets_and_blank_labels_are_rejected() {
    assert!(LabelSet::new(Vec::<String>::new()).is_err());
    assert!(LabelSet::new(["fire", "  "]).is_err());
  }

  #[test]
  fn duplicates_within_a_set_are_reported() {
    let labels = LabelSet::new(["masked", "person", "masked"]).unwrap();
    assert_eq!(labels.duplicates(), vec!["masked"]);
    assert_eq!(labels.get(2), Some("masked"));
  }

  #[test]
  fn shared_labels_across_detectors_are_flagged() {
    let general = LabelSet::new(["masked", "person", "masked"]).unwrap();
    let mask = LabelSet::new(["masked", "unmasked"]).unwrap();
    let fire = LabelSet::new(["fire", "smoke"]).unwrap();

    let shared = shared_labels([("general", &general), ("mask", &mask), ("fire", &fire)]);
    assert_eq!(
      shared,
      vec![SharedLabel {
        label: "masked".to_string(),
        detectors: vec!["general".to_string(), "mask".to_string()],
      }]
    );
  }
}
