// 该文件是 Shaowang （哨望） 项目的一部分。
// src/event.rs - 流水线事件记录
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

//! 流水线的日志协作者
//!
//! 控制器在构造时接收一个 [`EventLog`]，所有检测事件、告警与错误都经由它发出，
//! 生命周期与流水线实例一致。默认实现 [`TracingEventLog`] 转发到 `tracing`。

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::detector::{
  Detection, DetectorInitError, InferenceError, InferenceTimeout, LabelResolutionWarning,
  SharedLabel,
};

/// 非致命告警
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
  /// 类别索引越界，预测被丢弃
  LabelResolution(LabelResolutionWarning),
  /// 推理超出预算，检测器被降级
  InferenceTimeout(InferenceTimeout),
  /// 同名标签出现在多个检测器中，保持各自独立
  SharedLabel(SharedLabel),
  /// 单个标签集内部存在重复标签
  DuplicateLabel { detector: String, label: String },
  /// 输入源瞬时丢帧
  FrameMiss { consecutive: u32 },
}

impl std::fmt::Display for PipelineWarning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PipelineWarning::LabelResolution(w) => write!(f, "{}", w),
      PipelineWarning::InferenceTimeout(w) => write!(f, "{}", w),
      PipelineWarning::SharedLabel(s) => write!(
        f,
        "标签 {} 同时出现在检测器 {} 中，按检测器分别处理",
        s.label,
        s.detectors.join(", ")
      ),
      PipelineWarning::DuplicateLabel { detector, label } => {
        write!(f, "检测器 {} 的标签集中 {} 重复出现", detector, label)
      }
      PipelineWarning::FrameMiss { consecutive } => {
        write!(f, "输入源丢帧，已连续 {} 次", consecutive)
      }
    }
  }
}

/// 错误事件
#[derive(Debug)]
pub enum PipelineFault<'a> {
  DetectorInit(&'a DetectorInitError),
  Inference(&'a InferenceError),
  Other(&'a str),
}

impl std::fmt::Display for PipelineFault<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PipelineFault::DetectorInit(e) => write!(f, "{}", e),
      PipelineFault::Inference(e) => write!(f, "{}", e),
      PipelineFault::Other(msg) => f.write_str(msg),
    }
  }
}

/// 日志协作者
pub trait EventLog: Send + Sync {
  /// 检测事件：标签、百分比置信度、可选位置
  fn detection_event(&self, label: &str, confidence: f32, location: Option<[f32; 4]>);

  fn warning(&self, warning: &PipelineWarning);

  fn error(&self, fault: &PipelineFault<'_>);

  fn system_start(&self) {}

  fn system_stop(&self) {}

  /// 逐条上报一帧的检测结果
  fn detections(&self, detections: &[Detection]) {
    for d in detections {
      self.detection_event(&d.label, d.confidence, Some(d.bbox));
    }
  }
}

/// 转发到 `tracing` 的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
  fn detection_event(&self, label: &str, confidence: f32, location: Option<[f32; 4]>) {
    match location {
      Some(bbox) => warn!(
        label,
        confidence,
        bbox = ?bbox,
        "检测到 {}，置信度 {:.2}%",
        label,
        confidence
      ),
      None => warn!(label, confidence, "检测到 {}，置信度 {:.2}%", label, confidence),
    }
  }

  fn warning(&self, warning: &PipelineWarning) {
    warn!("{}", warning);
  }

  fn error(&self, fault: &PipelineFault<'_>) {
    error!("{}", fault);
  }

  fn system_start(&self) {
    info!("威胁检测流水线已启动");
  }

  fn system_stop(&self) {
    info!("威胁检测流水线已停止");
  }
}

/// 记录全部事件的实现，便于检查流水线行为
#[derive(Debug, Default)]
pub struct RecordingEventLog {
  pub detections: Mutex<Vec<(String, f32)>>,
  pub warnings: Mutex<Vec<PipelineWarning>>,
  pub errors: Mutex<Vec<String>>,
  pub lifecycle: Mutex<Vec<&'static str>>,
}

impl RecordingEventLog {
  pub fn warnings(&self) -> Vec<PipelineWarning> {
    self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
  }

  pub fn errors(&self) -> Vec<String> {
    self.errors.lock().map(|e| e.clone()).unwrap_or_default()
  }

  pub fn detections(&self) -> Vec<(String, f32)> {
    self.detections.lock().map(|d| d.clone()).unwrap_or_default()
  }

  pub fn lifecycle(&self) -> Vec<&'static str> {
    self.lifecycle.lock().map(|l| l.clone()).unwrap_or_default()
  }
}

impl EventLog for RecordingEventLog {
  fn detection_event(&self, label: &str, confidence: f32, _location: Option<[f32; 4]>) {
    if let Ok(mut d) = self.detections.lock() {
      d.push((label.to_string(), confidence));
    }
  }

  fn warning(&self, warning: &PipelineWarning) {
    if let Ok(mut w) = self.warnings.lock() {
      w.push(warning.clone());
    }
  }

  fn error(&self, fault: &PipelineFault<'_>) {
    if let Ok(mut e) = self.errors.lock() {
      e.push(fault.to_string());
    }
  }

  fn system_start(&self) {
    if let Ok(mut l) = self.lifecycle.lock() {
      l.push("start");
    }
  }

  fn system_stop(&self) {
    if let Ok(mut l) = self.lifecycle.lock() {
      l.push("stop");
    }
  }
}
