// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector/onnx.rs - ONNX Runtime 推理后端
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

use anyhow::{Context, Result, anyhow};
use ort::session::Session;
use ort::value::Value;
use tracing::{debug, info};
use url::Url;

use super::yolo::{InputScale, OutputLayout, decode, nms};
use super::{Model, RawPrediction};
use crate::{frame::Frame, utils};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;
const ONNX_DEFAULT_MIN_SCORE: f32 = 0.05;
const ONNX_DEFAULT_IOU: f32 = 0.5;
const ONNX_DEFAULT_THREADS: usize = 4;

/// ONNX 格式的 YOLO 检测模型
///
/// URL 形如 `onnx:///models/fire.onnx?size=640&iou=0.5&threads=4`。
/// 输出布局在首次推理时根据张量形状判断，稠密输出会在模型内部做按类别 NMS。
pub struct OnnxModel {
  session: Option<Session>,
  input_size: u32,
  min_score: f32,
  iou_threshold: f32,
}

impl OnnxModel {
  pub const SCHEME: &'static str = "onnx";

  pub fn open(url: &Url) -> Result<Self> {
    let path = utils::decoded_path(url);
    let query = utils::query_map(url);
    let threads = utils::query_or(&query, "threads", ONNX_DEFAULT_THREADS);

    info!("加载 ONNX 模型文件: {}", path);
    let model_bytes =
      std::fs::read(&path).with_context(|| format!("无法读取模型文件: {}", path))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_bytes.len() as f64 / (1024.0 * 1024.0)
    );

    let session = Session::builder()?
      .with_intra_threads(threads)?
      .commit_from_memory(&model_bytes)?;
    info!("ONNX 模型加载完成");

    Ok(Self {
      session: Some(session),
      input_size: utils::query_or(&query, "size", ONNX_DEFAULT_INPUT_SIZE),
      min_score: utils::query_or(&query, "min_score", ONNX_DEFAULT_MIN_SCORE),
      iou_threshold: utils::query_or(&query, "iou", ONNX_DEFAULT_IOU),
    })
  }

  // 拉伸到模型输入尺寸，NCHW 排布并归一化到 [0, 1]
  fn preprocess(&self, frame: &Frame) -> (usize, Vec<f32>) {
    let resized = frame.resized(self.input_size, self.input_size);
    let input = resized
      .to_nchw()
      .into_iter()
      .map(|v| v as f32 / 255.0)
      .collect();
    (resized.channels(), input)
  }
}

impl Model for OnnxModel {
  fn infer(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>> {
    let (channels, input) = self.preprocess(frame);
    let size = self.input_size as i64;
    let session = self
      .session
      .as_mut()
      .ok_or_else(|| anyhow!("模型已释放"))?;

    let input_tensor = Value::from_array((vec![1, channels as i64, size, size], input))?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();

    let layout = OutputLayout::from_shape(&dims)
      .ok_or_else(|| anyhow!("无法识别的输出形状: {:?}", dims))?;
    let scale = InputScale::stretched(frame.width(), frame.height(), self.input_size);
    let items = decode(layout, data, self.min_score, &scale);

    Ok(match layout {
      OutputLayout::Dense { .. } => nms(items, self.iou_threshold),
      OutputLayout::EndToEnd { .. } => items,
    })
  }

  fn release(&mut self) {
    self.session.take();
  }
}
