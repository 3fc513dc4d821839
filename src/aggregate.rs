// 该文件是 Shaowang （哨望） 项目的一部分。
// src/aggregate.rs - 多模型检测结果汇总
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

//! 多模型汇总
//!
//! 按注册顺序对每个活动检测器执行推理，把各自的预测归一化后合并为一帧的
//! [`DetectionSet`]。单个检测器的推理失败只影响它在当前帧的贡献；不做跨检测器的
//! 去重或 IoU 抑制。

use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::detector::{
  DetectionSet, DetectorAdapter, DetectorId, InferenceError, InferenceTimeout, RawPrediction,
  panic_message,
};
use crate::event::{EventLog, PipelineFault, PipelineWarning};
use crate::frame::Frame;

/// 推理调度方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
  /// 逐个检测器依次推理
  #[default]
  Sequential,
  /// 每帧为每个检测器启动一个作用域线程，结果按注册顺序汇合
  Parallel,
}

impl FromStr for ExecutionMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "sequential" | "seq" => Ok(ExecutionMode::Sequential),
      "parallel" | "par" => Ok(ExecutionMode::Parallel),
      other => Err(format!("未知的执行模式: {}", other)),
    }
  }
}

/// 单个检测器在整个会话中的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
  pub frames: u64,
  pub detections: u64,
  pub failures: u64,
  pub dropped: u64,
  pub timeouts: u64,
}

struct Slot {
  adapter: DetectorAdapter,
  active: bool,
  stats: DetectorStats,
}

type Outcome = (Result<Vec<RawPrediction>, InferenceError>, Duration);

pub struct Aggregator {
  slots: Vec<Slot>,
  mode: ExecutionMode,
  budget: Option<Duration>,
}

impl Aggregator {
  /// 检测器按传入顺序注册，该顺序即输出顺序
  pub fn new(detectors: Vec<DetectorAdapter>) -> Self {
    let slots = detectors
      .into_iter()
      .map(|adapter| Slot {
        adapter,
        active: true,
        stats: DetectorStats::default(),
      })
      .collect();
    Self {
      slots,
      mode: ExecutionMode::default(),
      budget: None,
    }
  }

  pub fn mode(mut self, mode: ExecutionMode) -> Self {
    self.mode = mode;
    self
  }

  /// 推理预算；超出预算的检测器本帧结果被丢弃并在会话剩余时间内停用
  pub fn inference_budget(mut self, budget: Option<Duration>) -> Self {
    self.budget = budget;
    self
  }

  pub fn execution_mode(&self) -> ExecutionMode {
    self.mode
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn active_count(&self) -> usize {
    self.slots.iter().filter(|s| s.active).count()
  }

  pub fn detector_ids(&self) -> impl Iterator<Item = &DetectorId> {
    self.slots.iter().map(|s| s.adapter.id())
  }

  pub fn stats(&self) -> Vec<(DetectorId, DetectorStats)> {
    self
      .slots
      .iter()
      .map(|s| (s.adapter.id().clone(), s.stats))
      .collect()
  }

  /// 对一帧执行全部活动检测器并汇总结果
  pub fn aggregate(&mut self, frame: &Frame, events: &dyn EventLog) -> DetectionSet {
    let outcomes = match self.mode {
      ExecutionMode::Sequential => self.infer_sequential(frame),
      ExecutionMode::Parallel => self.infer_parallel(frame),
    };

    let budget = self.budget;
    let mut set = DetectionSet::default();

    for (slot, outcome) in self.slots.iter_mut().zip(outcomes) {
      let Some((result, elapsed)) = outcome else {
        continue;
      };
      slot.stats.frames += 1;

      if let Some(budget) = budget {
        if elapsed > budget {
          let timeout = InferenceTimeout {
            detector: slot.adapter.id().clone(),
            elapsed_ms: elapsed.as_millis(),
            budget_ms: budget.as_millis(),
          };
          events.warning(&PipelineWarning::InferenceTimeout(timeout));
          slot.stats.timeouts += 1;
          slot.active = false;
          slot.adapter.release();
          continue;
        }
      }

      let predictions = match result {
        Ok(predictions) => predictions,
        Err(e) => {
          events.error(&PipelineFault::Inference(&e));
          slot.stats.failures += 1;
          continue;
        }
      };

      for prediction in &predictions {
        match slot.adapter.normalize(prediction) {
          Ok(detection) => {
            slot.stats.detections += 1;
            set.push(detection);
          }
          Err(w) => {
            events.warning(&PipelineWarning::LabelResolution(w));
            slot.stats.dropped += 1;
          }
        }
      }
    }

    debug!("帧 {} 汇总得到 {} 个检测结果", frame.index, set.len());
    set
  }

  fn infer_sequential(&mut self, frame: &Frame) -> Vec<Option<Outcome>> {
    self
      .slots
      .iter_mut()
      .map(|slot| slot.active.then(|| timed_infer(&mut slot.adapter, frame)))
      .collect()
  }

  fn infer_parallel(&mut self, frame: &Frame) -> Vec<Option<Outcome>> {
    std::thread::scope(|scope| {
      let handles: Vec<_> = self
        .slots
        .iter_mut()
        .map(|slot| {
          slot.active.then(|| {
            let id = slot.adapter.id().clone();
            let handle = scope.spawn(move || timed_infer(&mut slot.adapter, frame));
            (id, handle)
          })
        })
        .collect();

      handles
        .into_iter()
        .map(|entry| {
          entry.map(|(id, handle)| {
            handle.join().unwrap_or_else(|payload| {
              let source = anyhow::anyhow!("推理线程异常退出: {}", panic_message(payload.as_ref()));
              (Err(InferenceError { detector: id, source }), Duration::ZERO)
            })
          })
        })
        .collect()
    })
  }

  /// 记录各检测器的会话计数
  pub fn log_stats(&self) {
    for slot in &self.slots {
      let s = slot.stats;
      info!(
        detector = %slot.adapter.id(),
        active = slot.active,
        frames = s.frames,
        detections = s.detections,
        failures = s.failures,
        dropped = s.dropped,
        timeouts = s.timeouts,
        "检测器统计"
      );
    }
  }

  /// 释放全部检测器，重复调用无副作用
  pub fn release_all(&mut self) {
    for slot in &mut self.slots {
      slot.active = false;
      slot.adapter.release();
    }
  }
}

impl std::fmt::Debug for Aggregator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Aggregator")
      .field("detectors", &self.detector_ids().collect::<Vec<_>>())
      .field("active", &self.active_count())
      .field("mode", &self.mode)
      .field("budget", &self.budget)
      .finish()
  }
}

fn timed_infer(adapter: &mut DetectorAdapter, frame: &Frame) -> Outcome {
  let start = Instant::now();
  let result = adapter.infer(frame);
  let elapsed = start.elapsed();
  if result.is_err() {
    warn!("检测器 {} 本帧推理失败，耗时 {:?}", adapter.id(), elapsed);
  }
  (result, elapsed)
}
