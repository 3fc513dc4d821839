// 该文件是 Shaowang （哨望） 项目的一部分。
// src/pipeline.rs - 流水线控制器
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

//! 流水线控制器
//!
//! 状态机：`Initializing → Running → ShuttingDown → Stopped`。
//!
//! - 构建阶段打开输入源并逐个构造检测器，失败的检测器在整个会话中被排除；
//!   没有可用检测器时立即释放已获取的资源并返回 [`PipelineError::NoDetectorsAvailable`]。
//! - 运行阶段每次迭代：取帧 → 汇总推理 → 标注 → 帧率 → 输出 → 检查停止信号。
//! - 关闭阶段对输入源、检测器与输出端各释放一次，无论循环如何结束。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use std::{fmt, thread};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::aggregate::{Aggregator, ExecutionMode};
use crate::annotate::Annotator;
use crate::config::{DEFAULT_MAX_CONSECUTIVE_MISSES, DetectorDescriptor, PipelineConfig};
use crate::detector::{
  DetectorAdapter, DetectorInitError, LabelSet, Model, load_model, panic_message, shared_labels,
};
use crate::event::{EventLog, PipelineFault, PipelineWarning, TracingEventLog};
use crate::input::{AcquisitionError, FrameRead, FrameSource, open_source};
use crate::output::{FrameSink, NullSink, OutputError};
use crate::rate::RateTracker;

// 输入源瞬时丢帧后的等待时间
const MISS_BACKOFF: Duration = Duration::from_millis(5);
// 收到中断后强制退出前的等待时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Initializing,
  Running,
  ShuttingDown,
  Stopped,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入源错误: {0}")]
  Acquisition(#[from] AcquisitionError),
  #[error("没有可用的检测器")]
  NoDetectorsAvailable,
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("流水线运行时发生 panic: {0}")]
  Panicked(String),
  #[error("未配置输入源")]
  MissingSource,
  #[error("流水线已停止")]
  Stopped,
}

/// 协作式停止信号，每次迭代边界检查一次
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 安装 Ctrl-C 处理器；收到信号后若 30 秒内仍未退出则强制结束进程
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let flag = self.0.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

/// 运行结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 输入源已结束
  Exhausted,
  /// 连续丢帧超过上限
  TooManyMisses,
  /// 达到帧数上限
  FrameLimit,
  /// 输出端要求停止
  SinkRequested,
  /// 外部停止信号
  Interrupted,
}

impl fmt::Display for StopReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      StopReason::Exhausted => "输入源结束",
      StopReason::TooManyMisses => "连续丢帧过多",
      StopReason::FrameLimit => "达到帧数上限",
      StopReason::SinkRequested => "输出端请求停止",
      StopReason::Interrupted => "收到停止信号",
    };
    f.write_str(text)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
  pub frames: u64,
  pub detections: u64,
  pub rate: f64,
  pub reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
  pub execution: ExecutionMode,
  pub inference_budget: Option<Duration>,
  pub max_consecutive_misses: u32,
  pub max_frames: Option<u64>,
  pub overlay_rate: bool,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      execution: ExecutionMode::default(),
      inference_budget: None,
      max_consecutive_misses: DEFAULT_MAX_CONSECUTIVE_MISSES,
      max_frames: None,
      overlay_rate: true,
    }
  }
}

type SourceOpener = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, AcquisitionError>>;
type ModelLoader = Box<dyn FnOnce() -> Result<Box<dyn Model>, DetectorInitError>>;

struct Registration {
  name: String,
  labels: Vec<String>,
  threshold: f32,
  loader: ModelLoader,
}

/// 流水线构建器，`build` 即初始化阶段
pub struct PipelineBuilder {
  source: Option<SourceOpener>,
  registrations: Vec<Registration>,
  sink: Option<Box<dyn FrameSink>>,
  annotator: Option<Annotator>,
  events: Arc<dyn EventLog>,
  stop: StopSignal,
  options: PipelineOptions,
}

impl Default for PipelineBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl PipelineBuilder {
  pub fn new() -> Self {
    Self {
      source: None,
      registrations: Vec::new(),
      sink: None,
      annotator: None,
      events: Arc::new(TracingEventLog),
      stop: StopSignal::new(),
      options: PipelineOptions::default(),
    }
  }

  /// 按配置快照设置输入源、检测器与运行参数
  pub fn from_config(config: &PipelineConfig) -> Self {
    let options = PipelineOptions {
      execution: config.execution,
      inference_budget: config.inference_budget,
      max_consecutive_misses: config.max_consecutive_misses,
      max_frames: config.max_frames,
      overlay_rate: true,
    };
    let source = &config.source;
    let mut builder = Self::new()
      .source_url(source.url.clone(), source.width, source.height)
      .options(options);
    for descriptor in &config.detectors {
      builder = builder.descriptor(descriptor);
    }
    builder
  }

  pub fn source<F>(mut self, opener: F) -> Self
  where
    F: FnOnce() -> Result<Box<dyn FrameSource>, AcquisitionError> + 'static,
  {
    self.source = Some(Box::new(opener));
    self
  }

  pub fn source_url(self, url: Url, width: u32, height: u32) -> Self {
    self.source(move || open_source(&url, width, height))
  }

  /// 注册检测器，注册顺序即输出顺序
  pub fn detector<F>(mut self, name: &str, labels: Vec<String>, threshold: f32, loader: F) -> Self
  where
    F: FnOnce() -> Result<Box<dyn Model>, DetectorInitError> + 'static,
  {
    self.registrations.push(Registration {
      name: name.to_string(),
      labels,
      threshold,
      loader: Box::new(loader),
    });
    self
  }

  pub fn descriptor(self, descriptor: &DetectorDescriptor) -> Self {
    let name = descriptor.name.clone();
    let url = descriptor.model.clone();
    self.detector(
      &descriptor.name,
      descriptor.labels.clone(),
      descriptor.threshold,
      move || load_model(&name, &url),
    )
  }

  pub fn sink(mut self, sink: Box<dyn FrameSink>) -> Self {
    self.sink = Some(sink);
    self
  }

  pub fn annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = Some(annotator);
    self
  }

  pub fn events(mut self, events: Arc<dyn EventLog>) -> Self {
    self.events = events;
    self
  }

  pub fn stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = stop;
    self
  }

  pub fn options(mut self, options: PipelineOptions) -> Self {
    self.options = options;
    self
  }

  /// 初始化：打开输入源并构造检测器
  pub fn build(self) -> Result<PipelineController, PipelineError> {
    let PipelineBuilder {
      source,
      registrations,
      sink,
      annotator,
      events,
      stop,
      options,
    } = self;
    let mut sink = sink.unwrap_or_else(|| Box::new(NullSink));

    events.system_start();

    let opened = match source {
      Some(opener) => opener().map_err(PipelineError::from),
      None => Err(PipelineError::MissingSource),
    };
    let mut source = match opened {
      Ok(source) => source,
      Err(e) => {
        events.error(&PipelineFault::Other(&e.to_string()));
        close_sink(sink.as_mut(), events.as_ref());
        events.system_stop();
        return Err(e);
      }
    };

    let mut adapters = Vec::with_capacity(registrations.len());
    for registration in registrations {
      match construct_detector(registration) {
        Ok(adapter) => {
          info!(
            "检测器 {} 已就绪: {} 个标签，阈值 {}",
            adapter.id(),
            adapter.labels().len(),
            adapter.threshold()
          );
          adapters.push(adapter);
        }
        Err(e) => events.error(&PipelineFault::DetectorInit(&e)),
      }
    }

    if adapters.is_empty() {
      events.error(&PipelineFault::Other("没有可用的检测器"));
      source.release();
      close_sink(sink.as_mut(), events.as_ref());
      events.system_stop();
      return Err(PipelineError::NoDetectorsAvailable);
    }

    flag_label_overlaps(&adapters, events.as_ref());

    let aggregator = Aggregator::new(adapters)
      .mode(options.execution)
      .inference_budget(options.inference_budget);
    info!("流水线初始化完成: {:?}", aggregator);

    Ok(PipelineController {
      state: PipelineState::Initializing,
      source: Some(source),
      aggregator,
      sink: Some(sink),
      annotator: annotator.unwrap_or_default(),
      events,
      stop,
      options,
    })
  }
}

fn construct_detector(registration: Registration) -> Result<DetectorAdapter, DetectorInitError> {
  let Registration {
    name,
    labels,
    threshold,
    loader,
  } = registration;

  let labels = LabelSet::new(labels).map_err(|reason| DetectorInitError::InvalidLabels {
    detector: name.clone(),
    reason,
  })?;
  DetectorAdapter::check_threshold(&name, threshold)?;

  // 模型运行时加载时可能 panic，只影响该检测器
  let model = match catch_unwind(AssertUnwindSafe(loader)) {
    Ok(loaded) => loaded?,
    Err(payload) => {
      return Err(DetectorInitError::Load {
        detector: name,
        source: anyhow::anyhow!("模型加载时发生 panic: {}", panic_message(payload.as_ref())),
      });
    }
  };
  DetectorAdapter::new(&name, model, labels, threshold)
}

fn flag_label_overlaps(adapters: &[DetectorAdapter], events: &dyn EventLog) {
  for adapter in adapters {
    for label in adapter.labels().duplicates() {
      events.warning(&PipelineWarning::DuplicateLabel {
        detector: adapter.id().to_string(),
        label: label.to_string(),
      });
    }
  }

  let sets = adapters.iter().map(|a| (a.id().as_ref(), a.labels()));
  for shared in shared_labels(sets) {
    events.warning(&PipelineWarning::SharedLabel(shared));
  }
}

fn close_sink(sink: &mut dyn FrameSink, events: &dyn EventLog) {
  if let Err(e) = sink.close() {
    events.error(&PipelineFault::Other(&format!("关闭输出端失败: {}", e)));
  }
}

/// 流水线控制器，独占输入源、检测器与输出端
pub struct PipelineController {
  state: PipelineState,
  source: Option<Box<dyn FrameSource>>,
  aggregator: Aggregator,
  sink: Option<Box<dyn FrameSink>>,
  annotator: Annotator,
  events: Arc<dyn EventLog>,
  stop: StopSignal,
  options: PipelineOptions,
}

impl PipelineController {
  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn stop_signal(&self) -> StopSignal {
    self.stop.clone()
  }

  pub fn active_detectors(&self) -> usize {
    self.aggregator.active_count()
  }

  /// 运行主循环直到结束，随后执行关闭流程
  ///
  /// 循环内的 panic 与输出错误都会被捕获，经由同一关闭流程后返回错误。
  pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
    if self.state != PipelineState::Initializing {
      return Err(PipelineError::Stopped);
    }
    self.state = PipelineState::Running;
    info!("开始处理...");

    let result = match catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
      Ok(result) => result,
      Err(payload) => Err(PipelineError::Panicked(panic_message(payload.as_ref()))),
    };

    match &result {
      Ok(summary) => info!(
        "处理结束（{}）: {} 帧，{} 个检测结果，{:.2} FPS",
        summary.reason, summary.frames, summary.detections, summary.rate
      ),
      Err(e) => self.events.error(&PipelineFault::Other(&e.to_string())),
    }

    self.shutdown();
    result
  }

  fn run_loop(&mut self) -> Result<RunSummary, PipelineError> {
    let mut rate = RateTracker::new();
    let mut frames = 0u64;
    let mut detections = 0u64;
    let mut misses = 0u32;

    let reason = loop {
      if self.stop.is_stopped() {
        break StopReason::Interrupted;
      }
      if self.options.max_frames.is_some_and(|max| frames >= max) {
        break StopReason::FrameLimit;
      }
      if self.aggregator.active_count() == 0 {
        return Err(PipelineError::NoDetectorsAvailable);
      }

      let Some(source) = self.source.as_mut() else {
        break StopReason::Exhausted;
      };
      let mut frame = match source.next_frame() {
        FrameRead::Frame(frame) => {
          misses = 0;
          frame
        }
        FrameRead::Miss => {
          misses += 1;
          self
            .events
            .warning(&PipelineWarning::FrameMiss { consecutive: misses });
          if misses > self.options.max_consecutive_misses {
            break StopReason::TooManyMisses;
          }
          thread::sleep(MISS_BACKOFF);
          continue;
        }
        FrameRead::Exhausted => break StopReason::Exhausted,
      };

      let set = self.aggregator.aggregate(&frame, self.events.as_ref());
      self.events.detections(&set.items);
      frames += 1;
      detections += set.len() as u64;

      self.annotator.draw(&mut frame, &set);
      let fps = rate.tick();
      if self.options.overlay_rate {
        self.annotator.overlay_rate(&mut frame, fps);
      }
      debug!("帧 {}: {} 个检测结果，{:.2} FPS", frame.index, set.len(), fps);

      if let Some(sink) = self.sink.as_mut() {
        if sink.present(&frame, &set)?.is_stop() {
          break StopReason::SinkRequested;
        }
      }
    };

    Ok(RunSummary {
      frames,
      detections,
      rate: rate.rate(),
      reason,
    })
  }

  /// 释放输入源、检测器与输出端，重复调用无副作用
  pub fn shutdown(&mut self) {
    if self.state == PipelineState::Stopped {
      return;
    }
    self.state = PipelineState::ShuttingDown;
    info!("正在关闭流水线...");

    if let Some(mut source) = self.source.take() {
      source.release();
    }
    self.aggregator.log_stats();
    self.aggregator.release_all();
    if let Some(mut sink) = self.sink.take() {
      close_sink(sink.as_mut(), self.events.as_ref());
    }

    self.events.system_stop();
    self.state = PipelineState::Stopped;
  }
}

impl Drop for PipelineController {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl fmt::Debug for PipelineController {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineController")
      .field("state", &self.state)
      .field("aggregator", &self.aggregator)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::{RawPrediction, ReplayModel};
  use crate::event::RecordingEventLog;
  use crate::frame::Frame;
  use crate::input::InputSourceType;
  use crate::input::TestPatternSource;

  struct MissingSource {
    misses: u32,
    released: bool,
  }

  impl FrameSource for MissingSource {
    fn next_frame(&mut self) -> FrameRead {
      self.misses += 1;
      FrameRead::Miss
    }

    fn source_type(&self) -> InputSourceType {
      InputSourceType::TestPattern
    }

    fn width(&self) -> u32 {
      8
    }

    fn height(&self) -> u32 {
      8
    }

    fn release(&mut self) {
      self.released = true;
    }
  }

  fn fire_detector(builder: PipelineBuilder) -> PipelineBuilder {
    builder.detector("fire_smoke", vec!["fire".into(), "smoke".into()], 0.4, || {
      let model = ReplayModel::from_lines(r#"[{"bbox": [1, 1, 4, 4], "class": 0, "score": 0.9}]"#)
        .map_err(|source| DetectorInitError::Load {
          detector: "fire_smoke".to_string(),
          source,
        })?
        .looping(true);
      Ok(Box::new(model) as Box<dyn Model>)
    })
  }

  fn pattern(frames: u64) -> PipelineBuilder {
    PipelineBuilder::new()
      .source(move || Ok(Box::new(TestPatternSource::new(16, 12, frames)) as Box<dyn FrameSource>))
      .annotator(Annotator::without_font())
  }

  #[test]
  fn frame_limit_stops_the_loop() {
    let events = Arc::new(RecordingEventLog::default());
    let mut pipeline = fire_detector(pattern(0))
      .events(events.clone())
      .options(PipelineOptions {
        max_frames: Some(3),
        ..Default::default()
      })
      .build()
      .unwrap();

    let summary = pipeline.run().unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.detections, 3);
    assert_eq!(summary.reason, StopReason::FrameLimit);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(events.lifecycle(), vec!["start", "stop"]);
    assert_eq!(events.detections().len(), 3);
  }

  #[test]
  fn stop_signal_is_checked_before_each_iteration() {
    let stop = StopSignal::new();
    stop.stop();
    let mut pipeline = fire_detector(pattern(10)).stop_signal(stop).build().unwrap();
    let summary = pipeline.run().unwrap();
    assert_eq!(summary.frames, 0);
    assert_eq!(summary.reason, StopReason::Interrupted);
  }

  #[test]
  fn too_many_misses_count_as_exhaustion() {
    let events = Arc::new(RecordingEventLog::default());
    let mut pipeline = fire_detector(PipelineBuilder::new())
      .source(|| {
        Ok(Box::new(MissingSource {
          misses: 0,
          released: false,
        }) as Box<dyn FrameSource>)
      })
      .annotator(Annotator::without_font())
      .events(events.clone())
      .options(PipelineOptions {
        max_consecutive_misses: 3,
        ..Default::default()
      })
      .build()
      .unwrap();

    let summary = pipeline.run().unwrap();
    assert_eq!(summary.reason, StopReason::TooManyMisses);
    assert_eq!(summary.frames, 0);
    let misses = events
      .warnings()
      .into_iter()
      .filter(|w| matches!(w, PipelineWarning::FrameMiss { .. }))
      .count();
    assert_eq!(misses, 4);
  }

  #[test]
  fn run_after_stop_is_an_error() {
    let mut pipeline = fire_detector(pattern(2)).build().unwrap();
    assert_eq!(pipeline.run().unwrap().reason, StopReason::Exhausted);
    assert!(matches!(pipeline.run(), Err(PipelineError::Stopped)));
  }

  #[test]
  fn missing_source_is_reported() {
    let err = fire_detector(PipelineBuilder::new()).build().unwrap_err();
    assert!(matches!(err, PipelineError::MissingSource));
  }

  #[test]
  fn invalid_registrations_are_excluded() {
    let events = Arc::new(RecordingEventLog::default());
    let pipeline = fire_detector(pattern(1))
      .detector("broken", vec![], 0.4, || unreachable!("labels are checked first"))
      .detector("loud", vec!["x".into()], 1.5, || unreachable!("threshold is checked first"))
      .events(events.clone())
      .build()
      .unwrap();

    assert_eq!(pipeline.active_detectors(), 1);
    assert_eq!(events.errors().len(), 2);
  }

  #[test]
  fn shared_and_duplicate_labels_are_flagged() {
    let events = Arc::new(RecordingEventLog::default());
    let replay = || -> Result<Box<dyn Model>, DetectorInitError> {
      let model = ReplayModel::from_lines("[]").map_err(|source| DetectorInitError::Load {
        detector: "replay".to_string(),
        source,
      })?;
      Ok(Box::new(model))
    };
    let _pipeline = pattern(1)
      .detector("general", vec!["masked".into(), "person".into(), "masked".into()], 0.4, replay)
      .detector("mask", vec!["masked".into(), "unmasked".into()], 0.4, replay)
      .events(events.clone())
      .build()
      .unwrap();

    let warnings = events.warnings();
    assert!(warnings.iter().any(|w| matches!(
      w,
      PipelineWarning::DuplicateLabel { detector, label } if detector == "general" && label == "masked"
    )));
    assert!(warnings.iter().any(|w| matches!(
      w,
      PipelineWarning::SharedLabel(s) if s.label == "masked" && s.detectors == vec!["general", "mask"]
    )));
  }

  #[test]
  fn raw_predictions_reach_the_frame_annotated() {
    // 检测框被画到输出帧上
    struct Capture(std::rc::Rc<std::cell::RefCell<Vec<Frame>>>);
    impl FrameSink for Capture {
      fn present(
        &mut self,
        frame: &Frame,
        _: &crate::detector::DetectionSet,
      ) -> Result<crate::output::SinkSignal, OutputError> {
        self.0.borrow_mut().push(frame.clone());
        Ok(crate::output::SinkSignal::Continue)
      }
    }

    let frames = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let mut pipeline = pattern(1)
      .detector("fire_smoke", vec!["fire".into(), "smoke".into()], 0.4, || {
        struct Fixed;
        impl Model for Fixed {
          fn infer(&mut self, _: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
            Ok(vec![RawPrediction::new([2.0, 6.0, 10.0, 11.0], 0, 0.95)])
          }
        }
        Ok(Box::new(Fixed) as Box<dyn Model>)
      })
      .sink(Box::new(Capture(frames.clone())))
      .build()
      .unwrap();
    pipeline.run().unwrap();

    let frames = frames.borrow();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].image.get_pixel(6, 11).0, [255, 0, 0]);
  }
}
