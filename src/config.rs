// 该文件是 Shaowang （哨望） 项目的一部分。
// src/config.rs - 流水线配置快照
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

//! 流水线配置
//!
//! 配置在启动时构建一次，之后只读。输入源、检测器与输出端都以 URL 描述：
//!
//! - 输入：`v4l2:///dev/video0`、`image:///a.png?repeat=10`、`test://pattern?frames=100`
//! - 检测器：`onnx:///models/fire.onnx?profile=fire_smoke&threshold=0.4`、
//!   `replay:///preds.jsonl?labels=fire,smoke&name=fire`
//! - 输出：`image:///latest.png`、`folder:///records?record`、`jsonl:///d.jsonl`

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::FromUrl;
use crate::aggregate::ExecutionMode;
use crate::detector::DetectorProfile;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_THRESHOLD: f32 = 0.4;
pub const DEFAULT_MAX_CONSECUTIVE_MISSES: u32 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无效的 URL '{value}': {source}")]
  InvalidUrl {
    value: String,
    #[source]
    source: url::ParseError,
  },
  #[error("参数 {key} 的取值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("检测器 {0} 未指定标签，请使用 labels= 或 profile=")]
  MissingLabels(String),
  #[error("未知的检测器预设: {0}")]
  UnknownProfile(String),
  #[error("检测器名称重复: {0}")]
  DuplicateDetector(String),
  #[error("没有配置任何检测器")]
  NoDetectors,
}

/// 将字符串解析为 URL；不带方案的路径按本地文件处理
pub fn parse_url(value: &str) -> Result<Url, ConfigError> {
  match Url::parse(value) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) if value.starts_with('/') => {
      Url::parse(&format!("image://{}", value)).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_string(),
        source,
      })
    }
    Err(source) => Err(ConfigError::InvalidUrl {
      value: value.to_string(),
      source,
    }),
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
  pub url: Url,
  pub width: u32,
  pub height: u32,
}

impl SourceConfig {
  pub fn new(url: Url) -> Self {
    Self {
      url,
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
    }
  }

  pub fn size(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }
}

/// 单个检测器的注册描述
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorDescriptor {
  pub name: String,
  /// 去除配置参数后的模型 URL
  pub model: Url,
  pub labels: Vec<String>,
  pub threshold: f32,
}

impl DetectorDescriptor {
  pub fn parse(value: &str) -> Result<Self, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
      value: value.to_string(),
      source,
    })?;
    Self::from_url(&url)
  }
}

impl FromUrl for DetectorDescriptor {
  type Error = ConfigError;

  // name/labels/profile/threshold 由配置层消费，其余查询参数原样交给模型
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut name = None;
    let mut labels = None;
    let mut profile = None;
    let mut threshold = DEFAULT_THRESHOLD;
    let mut passthrough = Vec::new();

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "name" => name = Some(value.into_owned()),
        "labels" => {
          labels = Some(
            value
              .split(',')
              .map(|l| l.trim().to_string())
              .collect::<Vec<_>>(),
          )
        }
        "profile" => {
          let p: DetectorProfile = value
            .parse()
            .map_err(|_| ConfigError::UnknownProfile(value.to_string()))?;
          profile = Some(p);
        }
        "threshold" => {
          threshold = value.parse().map_err(|_| ConfigError::InvalidValue {
            key: "threshold".to_string(),
            value: value.to_string(),
          })?;
        }
        _ => passthrough.push((key.into_owned(), value.into_owned())),
      }
    }

    let name = name
      .or_else(|| profile.map(|p| p.name().to_string()))
      .or_else(|| {
        std::path::Path::new(url.path())
          .file_stem()
          .map(|s| s.to_string_lossy().into_owned())
      })
      .unwrap_or_else(|| url.scheme().to_string());

    let labels = labels
      .or_else(|| profile.map(|p| p.labels().iter().map(|l| l.to_string()).collect()))
      .ok_or_else(|| ConfigError::MissingLabels(name.clone()))?;

    let mut model = url.clone();
    model.set_query(None);
    if !passthrough.is_empty() {
      model.query_pairs_mut().extend_pairs(passthrough);
    }

    Ok(Self {
      name,
      model,
      labels,
      threshold,
    })
  }
}

/// 流水线的只读配置快照
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub source: SourceConfig,
  pub detectors: Vec<DetectorDescriptor>,
  pub outputs: Vec<Url>,
  pub execution: ExecutionMode,
  pub inference_budget: Option<Duration>,
  pub max_consecutive_misses: u32,
  pub max_frames: Option<u64>,
  pub font: Option<PathBuf>,
  pub color_overrides: Vec<String>,
}

impl PipelineConfig {
  pub fn new(source: SourceConfig) -> Self {
    Self {
      source,
      detectors: Vec::new(),
      outputs: Vec::new(),
      execution: ExecutionMode::default(),
      inference_budget: None,
      max_consecutive_misses: DEFAULT_MAX_CONSECUTIVE_MISSES,
      max_frames: None,
      font: None,
      color_overrides: Vec::new(),
    }
  }

  pub fn detector(mut self, descriptor: DetectorDescriptor) -> Self {
    self.detectors.push(descriptor);
    self
  }

  pub fn output(mut self, url: Url) -> Self {
    self.outputs.push(url);
    self
  }

  /// 检查检测器列表非空且名称唯一
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.detectors.is_empty() {
      return Err(ConfigError::NoDetectors);
    }
    let mut seen = HashSet::new();
    for d in &self.detectors {
      if !seen.insert(d.name.as_str()) {
        return Err(ConfigError::DuplicateDetector(d.name.clone()));
      }
    }
    if self.source.width == 0 || self.source.height == 0 {
      return Err(ConfigError::InvalidValue {
        key: "size".to_string(),
        value: format!("{}x{}", self.source.width, self.source.height),
      });
    }
    Ok(())
  }
}
