// 该文件是 Shaowang （哨望） 项目的一部分。
// src/main.rs - 主程序入口
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shaowang::annotate::{Annotator, ColorMap};
use shaowang::config::PipelineConfig;
use shaowang::output::open_sinks;
use shaowang::pipeline::{PipelineBuilder, StopSignal};

fn annotator(config: &PipelineConfig) -> Result<Annotator> {
  let annotator = match &config.font {
    Some(path) => Annotator::with_font_file(path)?,
    None => Annotator::with_system_font(),
  };
  let mut colors = ColorMap::default();
  for entry in &config.color_overrides {
    colors = colors.with_override(entry)?;
  }
  Ok(annotator.colors(colors))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  let config = args.to_config()?;

  info!("Shaowang 多模型威胁检测");
  info!("输入来源: {} ({}x{})", config.source.url, config.source.width, config.source.height);
  for d in &config.detectors {
    info!("检测器 {}: {} 标签 {:?} 阈值 {}", d.name, d.model, d.labels, d.threshold);
  }
  for output in &config.outputs {
    info!("输出: {}", output);
  }

  let stop = StopSignal::new();
  stop.install_ctrlc().context("无法设置 Ctrl-C 处理器")?;

  let sink = open_sinks(&config.outputs)?;
  let mut pipeline = PipelineBuilder::from_config(&config)
    .annotator(annotator(&config)?)
    .sink(sink)
    .stop_signal(stop)
    .build()?;

  let summary = pipeline.run()?;
  info!(
    "任务完成（{}）: 共处理 {} 帧，{} 个检测结果，平均 {:.2} FPS",
    summary.reason, summary.frames, summary.detections, summary.rate
  );

  Ok(())
}
