// 该文件是 Shaowang （哨望） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 单帧重复推理基准
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

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shaowang::config::{DetectorDescriptor, parse_url};
use shaowang::detector::{DetectorAdapter, LabelSet, load_model};
use shaowang::input::{FrameRead, open_source};

// 前两次推理用于预热，不计入平均值
const WARMUP: usize = 2;

/// 对同一帧重复执行各检测器并统计平均推理时间
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，只取第一帧
  #[arg(long, value_name = "SOURCE")]
  pub source: String,
  #[arg(long, default_value_t = 640)]
  pub width: u32,
  #[arg(long, default_value_t = 480)]
  pub height: u32,
  /// 检测器（可重复）
  #[arg(long = "detector", value_name = "MODEL", required = true)]
  pub detectors: Vec<String>,
  /// 重复次数
  #[arg(long, default_value_t = 100)]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  if args.repeat <= WARMUP {
    bail!("重复次数必须大于 {}", WARMUP);
  }

  let mut source = open_source(&parse_url(&args.source)?, args.width, args.height)?;
  let frame = match source.next_frame() {
    FrameRead::Frame(frame) => frame,
    other => bail!("没有输入帧: {:?}", other),
  };
  source.release();
  info!("输入帧获取成功: {}x{}", frame.width(), frame.height());

  for value in &args.detectors {
    let descriptor = DetectorDescriptor::parse(value)?;
    let labels = LabelSet::new(descriptor.labels.iter().cloned())
      .map_err(|reason| anyhow::anyhow!("检测器 {} 标签无效: {}", descriptor.name, reason))?;
    let model = load_model(&descriptor.name, &descriptor.model)?;
    let mut adapter = DetectorAdapter::new(&descriptor.name, model, labels, descriptor.threshold)?;

    let mut times = Vec::with_capacity(args.repeat);
    let mut kept = 0;
    for i in 0..args.repeat {
      let now = Instant::now();
      let predictions = adapter.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({}) {} 推理完成，耗时: {:.2?}，{} 个结果", i, descriptor.name, elapsed, predictions.len());
      kept = predictions.len();
      times.push(elapsed);
    }

    let measured = &times[WARMUP..];
    warn!(
      "{} 平均推理时间: {:.2?}（{} 次，最后一次 {} 个结果）",
      descriptor.name,
      measured.iter().sum::<Duration>() / measured.len() as u32,
      measured.len(),
      kept
    );
    adapter.release();
  }

  Ok(())
}
