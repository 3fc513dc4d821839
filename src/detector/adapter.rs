// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector/adapter.rs - 检测器适配层
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

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, info};

use super::{
  Detection, DetectorId, DetectorInitError, InferenceError, LabelResolutionWarning, LabelSet,
  Model, RawPrediction,
};
use crate::frame::Frame;

/// 单个检测器：推理能力 + 固定标签集 + 置信度阈值
///
/// 无论底层模型的原生输出是什么形状，适配层之上只会看到已过阈值的
/// [`RawPrediction`] 与归一化后的 [`Detection`]。
pub struct DetectorAdapter {
  id: DetectorId,
  model: Box<dyn Model>,
  labels: LabelSet,
  threshold: f32,
  released: bool,
}

impl DetectorAdapter {
  pub fn new(
    name: &str,
    model: Box<dyn Model>,
    labels: LabelSet,
    threshold: f32,
  ) -> Result<Self, DetectorInitError> {
    Self::check_threshold(name, threshold)?;
    Ok(Self {
      id: Arc::from(name),
      model,
      labels,
      threshold,
      released: false,
    })
  }

  /// 阈值必须是 [0, 1] 内的有限值
  pub fn check_threshold(name: &str, threshold: f32) -> Result<(), DetectorInitError> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
      return Err(DetectorInitError::InvalidThreshold {
        detector: name.to_string(),
        threshold,
      });
    }
    Ok(())
  }

  pub fn id(&self) -> &DetectorId {
    &self.id
  }

  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  /// 执行推理并按阈值过滤
  ///
  /// 模型返回错误或发生 panic 时都转换为 [`InferenceError`]，不会向上传播 panic。
  pub fn infer(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>, InferenceError> {
    let model = &mut self.model;
    let outcome = catch_unwind(AssertUnwindSafe(|| model.infer(frame)));

    let predictions = match outcome {
      Ok(Ok(predictions)) => predictions,
      Ok(Err(source)) => {
        return Err(InferenceError {
          detector: self.id.clone(),
          source,
        });
      }
      Err(payload) => {
        return Err(InferenceError {
          detector: self.id.clone(),
          source: anyhow::anyhow!("模型推理时发生 panic: {}", panic_message(payload.as_ref())),
        });
      }
    };

    let total = predictions.len();
    let kept: Vec<RawPrediction> = predictions
      .into_iter()
      .filter(|p| p.score.is_finite() && p.score >= self.threshold)
      .collect();
    debug!(
      "检测器 {}: {} 个原始预测，{} 个通过阈值 {}",
      self.id,
      total,
      kept.len(),
      self.threshold
    );
    Ok(kept)
  }

  /// 按类别索引解析标签
  pub fn resolve_label(&self, class_id: u32) -> Result<&str, LabelResolutionWarning> {
    self.labels.get(class_id).ok_or_else(|| LabelResolutionWarning {
      detector: self.id.clone(),
      class_id,
      label_count: self.labels.len(),
    })
  }

  /// 将原始预测归一化为检测结果，置信度换算为百分比
  pub fn normalize(&self, prediction: &RawPrediction) -> Result<Detection, LabelResolutionWarning> {
    let label = self.resolve_label(prediction.class_id)?;
    Ok(Detection {
      bbox: prediction.bbox,
      label: label.to_string(),
      confidence: (prediction.score * 100.0).clamp(0.0, 100.0),
      class_id: prediction.class_id,
      detector: self.id.clone(),
    })
  }

  /// 释放模型资源，重复调用无副作用
  pub fn release(&mut self) {
    if !self.released {
      self.released = true;
      self.model.release();
      info!("检测器 {} 已释放", self.id);
    }
  }
}

impl Drop for DetectorAdapter {
  fn drop(&mut self) {
    self.release();
  }
}

impl std::fmt::Debug for DetectorAdapter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DetectorAdapter")
      .field("id", &self.id)
      .field("labels", &self.labels)
      .field("threshold", &self.threshold)
      .finish_non_exhaustive()
  }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知 panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  struct Fixed(Vec<RawPrediction>);

  impl Model for Fixed {
    fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
      Ok(self.0.clone())
    }
  }

  struct Panicking;

  impl Model for Panicking {
    fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
      panic!("tensor shape mismatch")
    }
  }

  struct CountingRelease(Arc<AtomicUsize>);

  impl Model for CountingRelease {
    fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
      Ok(Vec::new())
    }

    fn release(&mut self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn adapter(model: impl Model + 'static, labels: &[&str], threshold: f32) -> DetectorAdapter {
    DetectorAdapter::new(
      "test",
      Box::new(model),
      LabelSet::new(labels.iter().copied()).unwrap(),
      threshold,
    )
    .unwrap()
  }

  #[test]
  fn predictions_below_threshold_never_leave_the_adapter() {
    let scores = [0.0, 0.1, 0.39, 0.3999, 0.4, 0.41, 0.9, 1.0, f32::NAN];
    let predictions = scores
      .iter()
      .map(|&s| RawPrediction::new([0.0, 0.0, 1.0, 1.0], 0, s))
      .collect();
    let mut adapter = adapter(Fixed(predictions), &["fire"], 0.4);

    let kept = adapter.infer(&Frame::filled(2, 2, [0, 0, 0])).unwrap();
    assert_eq!(
      kept.iter().map(|p| p.score).collect::<Vec<_>>(),
      vec![0.4, 0.41, 0.9, 1.0]
    );
    assert!(kept.iter().all(|p| p.score >= adapter.threshold()));
  }

  #[test]
  fn panic_inside_model_becomes_inference_error() {
    let mut adapter = adapter(Panicking, &["weapon"], 0.25);
    let err = adapter.infer(&Frame::filled(2, 2, [0, 0, 0])).unwrap_err();
    assert_eq!(err.detector.as_ref(), "test");
    assert!(err.source.to_string().contains("tensor shape mismatch"));
  }

  #[test]
  fn out_of_range_class_is_a_warning() {
    let adapter = adapter(Fixed(Vec::new()), &["fire", "smoke"], 0.4);
    assert_eq!(adapter.resolve_label(1), Ok("smoke"));
    let warning = adapter.resolve_label(2).unwrap_err();
    assert_eq!(warning.class_id, 2);
    assert_eq!(warning.label_count, 2);
  }

  #[test]
  fn normalize_rescales_confidence_to_percent() {
    let adapter = adapter(Fixed(Vec::new()), &["fire", "smoke"], 0.4);
    let detection = adapter
      .normalize(&RawPrediction::new([10.0, 10.0, 50.0, 50.0], 0, 0.9))
      .unwrap();
    assert_eq!(detection.label, "fire");
    assert!((detection.confidence - 90.0).abs() < 1e-4);
    assert_eq!(detection.bbox, [10.0, 10.0, 50.0, 50.0]);
  }

  #[test]
  fn invalid_threshold_is_rejected() {
    let labels = LabelSet::new(["fire"]).unwrap();
    assert!(DetectorAdapter::new("bad", Box::new(Fixed(Vec::new())), labels, 1.5).is_err());
  }

  #[test]
  fn release_runs_once_even_when_dropped_afterwards() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut adapter = adapter(CountingRelease(count.clone()), &["fire"], 0.4);
    adapter.release();
    adapter.release();
    drop(adapter);
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }
}
