// 该文件是 Shaowang （哨望） 项目的一部分。
// tests/pipeline.rs - 流水线集成测试
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
use std::sync::atomic::{AtomicUsize, Ordering};

use shaowang::annotate::Annotator;
use shaowang::config::{DetectorDescriptor, PipelineConfig, SourceConfig};
use shaowang::detector::{DetectionSet, DetectorInitError, Model, RawPrediction};
use shaowang::event::RecordingEventLog;
use shaowang::frame::Frame;
use shaowang::input::{AcquisitionError, FrameRead, FrameSource, InputSourceType};
use shaowang::output::{
  DetectionExportError, DetectionExportSink, FrameSink, OutputError, SinkSignal,
};
use shaowang::pipeline::{PipelineBuilder, PipelineError, PipelineState, StopReason};

#[derive(Default)]
struct Counters {
  source_calls: AtomicUsize,
  source_released: AtomicUsize,
  model_released: AtomicUsize,
  presented: AtomicUsize,
  sink_closed: AtomicUsize,
  loads: AtomicUsize,
}

impl Counters {
  fn get(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
  }
}

/// 前 `frames` 次返回帧，之后返回 Exhausted
struct ScriptedSource {
  frames: usize,
  counters: Arc<Counters>,
}

impl FrameSource for ScriptedSource {
  fn next_frame(&mut self) -> FrameRead {
    let call = self.counters.source_calls.fetch_add(1, Ordering::SeqCst);
    if call < self.frames {
      FrameRead::Frame(Frame::filled(64, 48, [0, 0, 0]).with_index(call as u64, call as u64 * 33))
    } else {
      FrameRead::Exhausted
    }
  }

  fn source_type(&self) -> InputSourceType {
    InputSourceType::TestPattern
  }

  fn width(&self) -> u32 {
    64
  }

  fn height(&self) -> u32 {
    48
  }

  fn release(&mut self) {
    self.counters.source_released.fetch_add(1, Ordering::SeqCst);
  }
}

enum Behavior {
  Emit(Vec<RawPrediction>),
  Fail,
}

struct ScriptedModel {
  behavior: Behavior,
  counters: Arc<Counters>,
}

impl Model for ScriptedModel {
  fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
    match &self.behavior {
      Behavior::Emit(predictions) => Ok(predictions.clone()),
      Behavior::Fail => Err(anyhow::anyhow!("模型输出形状异常")),
    }
  }

  fn release(&mut self) {
    self.counters.model_released.fetch_add(1, Ordering::SeqCst);
  }
}

enum SinkBehavior {
  Accept,
  PanicOn(usize),
  FailOn(usize),
}

struct ScriptedSink {
  behavior: SinkBehavior,
  counters: Arc<Counters>,
  labels: Arc<std::sync::Mutex<Vec<Vec<String>>>>,
}

impl FrameSink for ScriptedSink {
  fn present(&mut self, _frame: &Frame, detections: &DetectionSet) -> Result<SinkSignal, OutputError> {
    let n = self.counters.presented.fetch_add(1, Ordering::SeqCst) + 1;
    if let Ok(mut labels) = self.labels.lock() {
      labels.push(detections.iter().map(|d| d.label.clone()).collect());
    }
    match self.behavior {
      SinkBehavior::PanicOn(k) if n == k => panic!("显示窗口已关闭"),
      SinkBehavior::FailOn(k) if n == k => Err(OutputError::DetectionExport(
        DetectionExportError::Write(std::io::Error::other("磁盘已满")),
      )),
      _ => Ok(SinkSignal::Continue),
    }
  }

  fn close(&mut self) -> Result<(), OutputError> {
    self.counters.sink_closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

struct Harness {
  counters: Arc<Counters>,
  events: Arc<RecordingEventLog>,
  labels: Arc<std::sync::Mutex<Vec<Vec<String>>>>,
}

impl Harness {
  fn new() -> Self {
    Self {
      counters: Arc::new(Counters::default()),
      events: Arc::new(RecordingEventLog::default()),
      labels: Arc::new(std::sync::Mutex::new(Vec::new())),
    }
  }

  fn builder(&self, frames: usize, sink: SinkBehavior) -> PipelineBuilder {
    let counters = self.counters.clone();
    PipelineBuilder::new()
      .source(move || {
        Ok(Box::new(ScriptedSource { frames, counters }) as Box<dyn FrameSource>)
      })
      .sink(Box::new(ScriptedSink {
        behavior: sink,
        counters: self.counters.clone(),
        labels: self.labels.clone(),
      }))
      .annotator(Annotator::without_font())
      .events(self.events.clone())
  }

  fn model(&self, behavior: Behavior) -> impl FnOnce() -> Result<Box<dyn Model>, DetectorInitError> + 'static {
    let counters = self.counters.clone();
    move || {
      counters.loads.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(ScriptedModel { behavior, counters }) as Box<dyn Model>)
    }
  }

  fn failing_load(&self, name: &str) -> impl FnOnce() -> Result<Box<dyn Model>, DetectorInitError> + 'static {
    let name = name.to_string();
    let counters = self.counters.clone();
    move || {
      counters.loads.fetch_add(1, Ordering::SeqCst);
      Err(DetectorInitError::Load {
        detector: name,
        source: anyhow::anyhow!("模型文件不存在"),
      })
    }
  }

  fn labels(&self) -> Vec<Vec<String>> {
    self.labels.lock().map(|l| l.clone()).unwrap_or_default()
  }
}

fn fire() -> Behavior {
  Behavior::Emit(vec![RawPrediction::new([10.0, 10.0, 30.0, 30.0], 0, 0.9)])
}

fn weapon() -> Behavior {
  Behavior::Emit(vec![RawPrediction::new([35.0, 5.0, 60.0, 40.0], 0, 0.8)])
}

fn labels(names: &[&str]) -> Vec<String> {
  names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn exhaustion_on_fifth_call_processes_four_frames_and_releases_once() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(4, SinkBehavior::Accept)
    .detector("fire_smoke", labels(&["fire", "smoke"]), 0.4, h.model(fire()))
    .detector("weapon", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();

  let summary = pipeline.run().unwrap();
  assert_eq!(summary.frames, 4);
  assert_eq!(summary.detections, 8);
  assert_eq!(summary.reason, StopReason::Exhausted);
  assert_eq!(Counters::get(&h.counters.source_calls), 5);
  assert_eq!(Counters::get(&h.counters.presented), 4);

  drop(pipeline);
  assert_eq!(Counters::get(&h.counters.source_released), 1);
  assert_eq!(Counters::get(&h.counters.model_released), 2);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
  assert_eq!(h.events.lifecycle(), vec!["start", "stop"]);
}

#[test]
fn fire_and_weapon_reach_the_sink_in_registration_order() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(1, SinkBehavior::Accept)
    .detector("fire_smoke", labels(&["fire", "smoke"]), 0.4, h.model(fire()))
    .detector("weapon", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();
  pipeline.run().unwrap();

  assert_eq!(h.labels(), vec![labels(&["fire", "weapon"])]);
  let detections = h.events.detections();
  assert_eq!(detections.len(), 2);
  assert!((detections[0].1 - 90.0).abs() < 1e-3);
  assert!((detections[1].1 - 80.0).abs() < 1e-3);
}

#[test]
fn failing_detector_does_not_hide_valid_one() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(3, SinkBehavior::Accept)
    .detector("a", labels(&["fire"]), 0.4, h.model(Behavior::Fail))
    .detector("b", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();

  let summary = pipeline.run().unwrap();
  assert_eq!(summary.frames, 3);
  assert_eq!(h.labels(), vec![labels(&["weapon"]); 3]);
  assert_eq!(h.events.errors().len(), 3);
}

#[test]
fn no_detectors_releases_acquired_resources() {
  let h = Harness::new();
  let err = h
    .builder(4, SinkBehavior::Accept)
    .detector("a", labels(&["fire"]), 0.4, h.failing_load("a"))
    .detector("b", labels(&["weapon"]), 0.4, h.failing_load("b"))
    .build()
    .unwrap_err();

  assert!(matches!(err, PipelineError::NoDetectorsAvailable));
  assert_eq!(Counters::get(&h.counters.loads), 2);
  assert_eq!(Counters::get(&h.counters.source_calls), 0);
  assert_eq!(Counters::get(&h.counters.source_released), 1);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
}

#[test]
fn failed_detector_is_excluded_while_others_run() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(2, SinkBehavior::Accept)
    .detector("a", labels(&["fire"]), 0.4, h.failing_load("a"))
    .detector("b", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();

  assert_eq!(pipeline.active_detectors(), 1);
  assert_eq!(pipeline.run().unwrap().detections, 2);
}

#[test]
fn panicking_loader_is_excluded_while_others_run() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(2, SinkBehavior::Accept)
    .detector("bad", labels(&["fire"]), 0.4, || -> Result<Box<dyn Model>, DetectorInitError> {
      panic!("onnx 运行时初始化失败")
    })
    .detector("good", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();

  assert_eq!(pipeline.active_detectors(), 1);
  let errors = h.events.errors();
  assert_eq!(errors.len(), 1);
  assert!(errors[0].contains("bad"));
  assert!(errors[0].contains("onnx 运行时初始化失败"));

  assert_eq!(pipeline.run().unwrap().detections, 2);
  assert_eq!(Counters::get(&h.counters.source_released), 1);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
}

#[test]
fn acquisition_failure_skips_detector_loading() {
  let h = Harness::new();
  let err = h
    .builder(0, SinkBehavior::Accept)
    .source(|| {
      Err(AcquisitionError::Device {
        path: "/dev/video9".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
      })
    })
    .detector("b", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap_err();

  assert!(matches!(err, PipelineError::Acquisition(_)));
  assert_eq!(Counters::get(&h.counters.loads), 0);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
}

#[test]
fn panic_in_loop_still_cleans_up() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(10, SinkBehavior::PanicOn(2))
    .detector("fire_smoke", labels(&["fire", "smoke"]), 0.4, h.model(fire()))
    .build()
    .unwrap();

  let err = pipeline.run().unwrap_err();
  assert!(matches!(err, PipelineError::Panicked(ref msg) if msg.contains("显示窗口已关闭")));
  assert_eq!(pipeline.state(), PipelineState::Stopped);
  assert_eq!(Counters::get(&h.counters.source_released), 1);
  assert_eq!(Counters::get(&h.counters.model_released), 1);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
  assert!(matches!(pipeline.run(), Err(PipelineError::Stopped)));
}

#[test]
fn sink_error_ends_session_through_cleanup() {
  let h = Harness::new();
  let mut pipeline = h
    .builder(10, SinkBehavior::FailOn(3))
    .detector("weapon", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();

  assert!(matches!(pipeline.run(), Err(PipelineError::Output(_))));
  assert_eq!(Counters::get(&h.counters.presented), 3);
  assert_eq!(Counters::get(&h.counters.source_released), 1);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
}

#[test]
fn dropping_an_unrun_pipeline_releases_everything() {
  let h = Harness::new();
  let pipeline = h
    .builder(4, SinkBehavior::Accept)
    .detector("weapon", labels(&["weapon"]), 0.4, h.model(weapon()))
    .build()
    .unwrap();
  assert_eq!(pipeline.state(), PipelineState::Initializing);
  drop(pipeline);

  assert_eq!(Counters::get(&h.counters.source_calls), 0);
  assert_eq!(Counters::get(&h.counters.source_released), 1);
  assert_eq!(Counters::get(&h.counters.model_released), 1);
  assert_eq!(Counters::get(&h.counters.sink_closed), 1);
}

#[test]
fn replayed_detectors_export_one_record_per_frame() {
  let dir = tempfile::tempdir().unwrap();
  let fire_file = dir.path().join("fire.jsonl");
  std::fs::write(
    &fire_file,
    "[{\"bbox\": [10, 10, 30, 30], \"class\": 0, \"score\": 0.9}]\n[]\n",
  )
  .unwrap();
  let weapon_file = dir.path().join("weapon.jsonl");
  std::fs::write(
    &weapon_file,
    "[{\"bbox\": [35, 5, 60, 40], \"class\": 0, \"score\": 0.8}, {\"bbox\": [0, 0, 5, 5], \"class\": 0, \"score\": 0.2}]\n{\"error\": \"timeout\"}\n",
  )
  .unwrap();

  let source = SourceConfig::new(url::Url::parse("test://pattern?frames=2").unwrap()).size(64, 48);
  let config = PipelineConfig::new(source)
    .detector(
      DetectorDescriptor::parse(&format!("replay://{}?profile=fire_smoke", fire_file.display()))
        .unwrap(),
    )
    .detector(
      DetectorDescriptor::parse(&format!("replay://{}?profile=weapon", weapon_file.display()))
        .unwrap(),
    );
  config.validate().unwrap();

  let export = dir.path().join("detections.jsonl");
  let events = Arc::new(RecordingEventLog::default());
  let mut pipeline = PipelineBuilder::from_config(&config)
    .annotator(Annotator::without_font())
    .sink(Box::new(DetectionExportSink::create(&export, false).unwrap()))
    .events(events.clone())
    .build()
    .unwrap();

  let summary = pipeline.run().unwrap();
  assert_eq!(summary.frames, 2);
  assert_eq!(summary.detections, 2);

  let records: Vec<serde_json::Value> = std::fs::read_to_string(&export)
    .unwrap()
    .lines()
    .map(|l| serde_json::from_str(l).unwrap())
    .collect();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0]["detections"][0]["label"], "fire");
  assert_eq!(records[0]["detections"][1]["label"], "weapon");
  assert_eq!(records[0]["detections"].as_array().unwrap().len(), 2);
  assert_eq!(records[1]["detections"].as_array().unwrap().len(), 0);
  assert_eq!(events.errors().len(), 1);
}
