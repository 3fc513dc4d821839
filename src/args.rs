// 该文件是 Shaowang （哨望） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use shaowang::aggregate::ExecutionMode;
use shaowang::config::{
  ConfigError, DEFAULT_HEIGHT, DEFAULT_MAX_CONSECUTIVE_MISSES, DEFAULT_WIDTH, DetectorDescriptor,
  PipelineConfig, SourceConfig, parse_url,
};

/// Shaowang 多模型威胁检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - V4L2: v4l2:///dev/video0
  /// - 图片: image:///path/to/frame.png?repeat=100 或 /path/to/frame.png
  /// - GStreamer: gst://camera/dev/video0?fps=15 或 gst://file/path/to/video.mp4
  /// - 测试图案: test://pattern?frames=300
  #[arg(long, value_name = "SOURCE", default_value = "v4l2:///dev/video0")]
  pub source: String,

  /// 采集宽度
  #[arg(long, default_value_t = DEFAULT_WIDTH)]
  pub width: u32,

  /// 采集高度
  #[arg(long, default_value_t = DEFAULT_HEIGHT)]
  pub height: u32,

  /// 检测器（可重复，按出现顺序注册）
  /// 例如: onnx:///models/fire.onnx?profile=fire_smoke&threshold=0.4
  #[arg(long = "detector", value_name = "MODEL", required = true)]
  pub detectors: Vec<String>,

  /// 输出（可重复）
  /// 例如: image:///tmp/latest.png, folder:///records?record, jsonl:///d.jsonl
  #[arg(long = "output", value_name = "OUTPUT")]
  pub outputs: Vec<String>,

  /// 每帧并行执行各检测器
  #[arg(long)]
  pub parallel: bool,

  /// 单次推理预算（毫秒），超出后该检测器被停用
  #[arg(long, value_name = "MS")]
  pub inference_budget_ms: Option<u64>,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 允许的最大连续丢帧次数
  #[arg(long, default_value_t = DEFAULT_MAX_CONSECUTIVE_MISSES, value_name = "COUNT")]
  pub max_misses: u32,

  /// 标注字体文件（TTF/OTF），缺省时查找系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 标签颜色覆盖，形如 weapon=ff8c00（可重复）
  #[arg(long = "color", value_name = "LABEL=RRGGBB")]
  pub colors: Vec<String>,
}

impl Args {
  pub fn to_config(&self) -> Result<PipelineConfig, ConfigError> {
    let source = SourceConfig::new(parse_url(&self.source)?).size(self.width, self.height);
    let mut config = PipelineConfig::new(source);

    for detector in &self.detectors {
      config = config.detector(DetectorDescriptor::parse(detector)?);
    }
    for output in &self.outputs {
      config = config.output(parse_url(output)?);
    }

    config.execution = if self.parallel {
      ExecutionMode::Parallel
    } else {
      ExecutionMode::Sequential
    };
    config.inference_budget = self.inference_budget_ms.map(Duration::from_millis);
    config.max_consecutive_misses = self.max_misses;
    config.max_frames = self.max_frames;
    config.font = self.font.clone();
    config.color_overrides = self.colors.clone();

    config.validate()?;
    Ok(config)
  }
}
