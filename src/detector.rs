// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector.rs - 检测器与检测结果定义
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

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::frame::Frame;

mod adapter;
mod labels;
mod profile;
mod replay;
pub mod yolo;

#[cfg(feature = "model_onnx")]
mod onnx;

pub use self::adapter::DetectorAdapter;
pub(crate) use self::adapter::panic_message;
pub use self::labels::{LabelSet, SharedLabel, shared_labels};
pub use self::profile::DetectorProfile;
pub use self::replay::ReplayModel;

#[cfg(feature = "model_onnx")]
pub use self::onnx::OnnxModel;

/// 检测器标识
pub type DetectorId = Arc<str>;

/// 推理能力
///
/// 每个模型是一个只暴露单一推理能力的黑盒，模型资源由持有它的检测器独占。
pub trait Model: Send {
  /// 对一帧执行推理，输出帧像素坐标下的原始预测
  fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<RawPrediction>>;

  /// 释放模型资源
  fn release(&mut self) {}
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
    (**self).infer(frame)
  }

  fn release(&mut self) {
    (**self).release()
  }
}

/// 模型单次推理的原始输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction {
  pub bbox: [f32; 4], // [x1, y1, x2, y2]，帧像素坐标
  pub class_id: u32,
  pub score: f32,
}

impl RawPrediction {
  /// 构造预测，保证 x1 <= x2 且 y1 <= y2
  pub fn new(bbox: [f32; 4], class_id: u32, score: f32) -> Self {
    let [x1, y1, x2, y2] = bbox;
    Self {
      bbox: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
      class_id,
      score,
    }
  }
}

/// 归一化后的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: [f32; 4],
  pub label: String,
  /// 百分比置信度 [0, 100]
  pub confidence: f32,
  pub class_id: u32,
  pub detector: DetectorId,
}

impl Detection {
  /// 以整数像素表示的边框
  pub fn pixel_box(&self) -> [i32; 4] {
    self.bbox.map(|v| v.round() as i32)
  }
}

/// 单帧的全部检测结果，按检测器注册顺序、再按检测器内预测顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  pub items: Vec<Detection>,
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn push(&mut self, detection: Detection) {
    self.items.push(detection);
  }

  pub fn extend(&mut self, detections: impl IntoIterator<Item = Detection>) {
    self.items.extend(detections);
  }

  /// 导出为 JSON 记录
  pub fn to_json(&self, frame: &Frame) -> serde_json::Value {
    let detections = self
      .items
      .iter()
      .map(|d| {
        serde_json::json!({
          "detector": d.detector.as_ref(),
          "label": d.label,
          "confidence": d.confidence,
          "bbox": d.bbox,
        })
      })
      .collect::<Vec<_>>();

    serde_json::json!({
      "frame": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "detections": detections,
    })
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

#[derive(Error, Debug)]
pub enum DetectorInitError {
  #[error("检测器 {detector} 加载失败: {source}")]
  Load {
    detector: String,
    #[source]
    source: anyhow::Error,
  },
  #[error("检测器 {detector} 标签集无效: {reason}")]
  InvalidLabels { detector: String, reason: String },
  #[error("检测器 {detector} 置信度阈值无效: {threshold}")]
  InvalidThreshold { detector: String, threshold: f32 },
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

#[derive(Error, Debug)]
#[error("检测器 {detector} 推理失败: {source}")]
pub struct InferenceError {
  pub detector: DetectorId,
  #[source]
  pub source: anyhow::Error,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("检测器 {detector} 的类别索引 {class_id} 超出标签集范围 (共 {label_count} 个标签)")]
pub struct LabelResolutionWarning {
  pub detector: DetectorId,
  pub class_id: u32,
  pub label_count: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("检测器 {detector} 推理耗时 {elapsed_ms} ms，超过预算 {budget_ms} ms")]
pub struct InferenceTimeout {
  pub detector: DetectorId,
  pub elapsed_ms: u128,
  pub budget_ms: u128,
}

/// 根据模型 URL 加载推理能力
///
/// 支持的方案：
/// - `replay:///path/to/predictions.jsonl`
/// - `onnx:///path/to/model.onnx?size=640`（需要 `model_onnx` 特性）
pub fn load_model(detector: &str, url: &Url) -> Result<Box<dyn Model>, DetectorInitError> {
  info!("检测器 {} 加载模型: {}", detector, url);
  let load_error = |source: anyhow::Error| DetectorInitError::Load {
    detector: detector.to_string(),
    source,
  };

  match url.scheme() {
    ReplayModel::SCHEME => Ok(Box::new(ReplayModel::open(url).map_err(load_error)?)),
    #[cfg(feature = "model_onnx")]
    OnnxModel::SCHEME => Ok(Box::new(OnnxModel::open(url).map_err(load_error)?)),
    other => Err(DetectorInitError::SchemeMismatch(other.to_string())),
  }
}
