// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector/replay.rs - 回放检测结果的模型
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

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::{Model, RawPrediction};
use crate::{frame::Frame, utils};

/// 逐帧回放预先记录的预测结果
///
/// 文件为 JSON Lines，每行对应一帧：
///
/// ```text
/// [{"bbox": [10, 10, 50, 50], "class": 0, "score": 0.9}]
/// []
/// {"error": "模型超时"}
/// ```
///
/// `{"error": ...}` 行会使该帧推理失败。记录用尽后输出空结果，
/// 指定 `?loop` 时从头循环。
pub struct ReplayModel {
  frames: Vec<ReplayFrame>,
  cursor: usize,
  looping: bool,
}

#[derive(Debug, Clone)]
enum ReplayFrame {
  Predictions(Vec<RawPrediction>),
  Failure(String),
}

impl ReplayModel {
  pub const SCHEME: &'static str = "replay";

  pub fn open(url: &Url) -> Result<Self> {
    let path = utils::decoded_path(url);
    let query = utils::query_map(url);
    let mut model = Self::from_file(Path::new(&path))?;
    model.looping = utils::query_flag(&query, "loop");
    Ok(model)
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("无法读取回放文件: {}", path.display()))?;
    let model = Self::from_lines(&content)?;
    info!("回放文件 {} 共 {} 帧", path.display(), model.frames.len());
    Ok(model)
  }

  pub fn from_lines(content: &str) -> Result<Self> {
    let frames = content
      .lines()
      .enumerate()
      .filter(|(_, line)| !line.trim().is_empty())
      .map(|(idx, line)| parse_line(line).with_context(|| format!("回放文件第 {} 行无效", idx + 1)))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      frames,
      cursor: 0,
      looping: false,
    })
  }

  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }
}

fn parse_line(line: &str) -> Result<ReplayFrame> {
  match serde_json::from_str::<Value>(line)? {
    Value::Array(items) => items
      .iter()
      .map(parse_prediction)
      .collect::<Result<Vec<_>>>()
      .map(ReplayFrame::Predictions),
    Value::Object(map) => match map.get("error") {
      Some(Value::String(msg)) => Ok(ReplayFrame::Failure(msg.clone())),
      _ => bail!("对象行必须包含 error 字段"),
    },
    other => bail!("无法识别的行: {}", other),
  }
}

fn parse_prediction(item: &Value) -> Result<RawPrediction> {
  let bbox = item
    .get("bbox")
    .and_then(Value::as_array)
    .filter(|b| b.len() == 4)
    .ok_or_else(|| anyhow!("bbox 必须是长度为 4 的数组"))?;
  let mut coords = [0f32; 4];
  for (dst, src) in coords.iter_mut().zip(bbox) {
    *dst = src.as_f64().ok_or_else(|| anyhow!("bbox 坐标必须是数字"))? as f32;
  }

  let class_id = item
    .get("class")
    .and_then(Value::as_u64)
    .ok_or_else(|| anyhow!("class 必须是非负整数"))?;
  let score = item
    .get("score")
    .and_then(Value::as_f64)
    .ok_or_else(|| anyhow!("score 必须是数字"))?;

  Ok(RawPrediction::new(
    coords,
    u32::try_from(class_id)?,
    score as f32,
  ))
}

impl Model for ReplayModel {
  fn infer(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>> {
    if self.frames.is_empty() {
      return Ok(Vec::new());
    }
    if self.cursor >= self.frames.len() {
      if !self.looping {
        return Ok(Vec::new());
      }
      self.cursor = 0;
    }

    let entry = &self.frames[self.cursor];
    self.cursor += 1;
    debug!("回放第 {} 条记录 (帧 {})", self.cursor, frame.index);

    match entry {
      ReplayFrame::Predictions(predictions) => Ok(predictions.clone()),
      ReplayFrame::Failure(msg) => Err(anyhow!("{}", msg)),
    }
  }

  fn release(&mut self) {
    self.frames.clear();
  }
}
