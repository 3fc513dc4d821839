// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detector/yolo.rs - YOLO 系列模型输出解码
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

//! 不同导出方式的 YOLO 模型输出形状各不相同，这里统一解码为
//! 帧像素坐标下的 [`RawPrediction`]：
//!
//! - 稠密输出 `[1, 4 + C, N]`：每个候选框为 `cx, cy, w, h` 加 C 个类别分数（YOLOv8/11）
//! - 端到端输出 `[1, N, 6]`：每行为 `x1, y1, x2, y2, score, class`（YOLOv10/26 导出）

use std::cmp::Ordering;

use tracing::debug;

use super::RawPrediction;

/// 模型输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  Dense { num_classes: usize, num_anchors: usize },
  EndToEnd { num_rows: usize },
}

impl OutputLayout {
  /// 根据输出张量形状判断布局
  pub fn from_shape(shape: &[usize]) -> Option<Self> {
    match shape {
      [1, rows, 6] => Some(OutputLayout::EndToEnd { num_rows: *rows }),
      [1, features, anchors] if *features > 4 => Some(OutputLayout::Dense {
        num_classes: features - 4,
        num_anchors: *anchors,
      }),
      _ => None,
    }
  }
}

/// 模型输入坐标到帧像素坐标的映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputScale {
  pub scale_x: f32,
  pub scale_y: f32,
  pub frame_width: f32,
  pub frame_height: f32,
}

impl InputScale {
  /// 帧被直接拉伸到 `input_size x input_size` 时的映射
  pub fn stretched(frame_width: u32, frame_height: u32, input_size: u32) -> Self {
    let size = input_size.max(1) as f32;
    Self {
      scale_x: frame_width as f32 / size,
      scale_y: frame_height as f32 / size,
      frame_width: frame_width as f32,
      frame_height: frame_height as f32,
    }
  }

  fn map(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> [f32; 4] {
    [
      (x1 * self.scale_x).clamp(0.0, self.frame_width),
      (y1 * self.scale_y).clamp(0.0, self.frame_height),
      (x2 * self.scale_x).clamp(0.0, self.frame_width),
      (y2 * self.scale_y).clamp(0.0, self.frame_height),
    ]
  }
}

/// 按布局解码输出张量
pub fn decode(
  layout: OutputLayout,
  data: &[f32],
  min_score: f32,
  scale: &InputScale,
) -> Vec<RawPrediction> {
  match layout {
    OutputLayout::Dense {
      num_classes,
      num_anchors,
    } => decode_dense(data, num_classes, num_anchors, min_score, scale),
    OutputLayout::EndToEnd { num_rows } => decode_end_to_end(data, num_rows, min_score, scale),
  }
}

/// 解码稠密输出，数据按 `[feature][anchor]` 排布
pub fn decode_dense(
  data: &[f32],
  num_classes: usize,
  num_anchors: usize,
  min_score: f32,
  scale: &InputScale,
) -> Vec<RawPrediction> {
  let expected = (4 + num_classes) * num_anchors;
  if data.len() < expected {
    debug!("稠密输出长度不足: 期望 {}, 实际 {}", expected, data.len());
    return Vec::new();
  }

  let at = |feature: usize, anchor: usize| data[feature * num_anchors + anchor];
  let mut items = Vec::new();

  for anchor in 0..num_anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(4 + c, anchor)))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < min_score {
      continue;
    }

    let cx = at(0, anchor);
    let cy = at(1, anchor);
    let w = at(2, anchor);
    let h = at(3, anchor);

    items.push(RawPrediction::new(
      scale.map(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
      class_id as u32,
      score,
    ));
  }

  items
}

/// 解码端到端输出，每行 `x1, y1, x2, y2, score, class`
pub fn decode_end_to_end(
  data: &[f32],
  num_rows: usize,
  min_score: f32,
  scale: &InputScale,
) -> Vec<RawPrediction> {
  data
    .chunks_exact(6)
    .take(num_rows)
    .filter(|row| row[4] >= min_score && row[5] >= 0.0)
    .map(|row| {
      RawPrediction::new(
        scale.map(row[0], row[1], row[2], row[3]),
        row[5].round() as u32,
        row[4],
      )
    })
    .collect()
}

/// 两个边框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix1 = a[0].max(b[0]);
  let iy1 = a[1].max(b[1]);
  let ix2 = a[2].min(b[2]);
  let iy2 = a[3].min(b[3]);

  let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;

  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 同一模型内按类别做非极大值抑制，结果按分数从高到低排列
pub fn nms(mut items: Vec<RawPrediction>, iou_threshold: f32) -> Vec<RawPrediction> {
  items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  let mut kept: Vec<RawPrediction> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unit_scale() -> InputScale {
    InputScale::stretched(640, 640, 640)
  }

  #[test]
  fn layout_is_detected_from_shape() {
    assert_eq!(
      OutputLayout::from_shape(&[1, 84, 8400]),
      Some(OutputLayout::Dense {
        num_classes: 80,
        num_anchors: 8400
      })
    );
    assert_eq!(
      OutputLayout::from_shape(&[1, 300, 6]),
      Some(OutputLayout::EndToEnd { num_rows: 300 })
    );
    assert_eq!(OutputLayout::from_shape(&[1, 4, 100]), None);
    assert_eq!(OutputLayout::from_shape(&[84, 8400]), None);
  }

  #[test]
  fn dense_output_picks_best_class_per_anchor() {
    // 2 个类别，3 个候选框，按 [feature][anchor] 排布
    let data = vec![
      100.0, 200.0, 300.0, // cx
      100.0, 200.0, 300.0, // cy
      20.0, 40.0, 10.0, // w
      20.0, 40.0, 10.0, // h
      0.9, 0.1, 0.02, // class 0
      0.2, 0.7, 0.01, // class 1
    ];
    let items = decode_dense(&data, 2, 3, 0.05, &unit_scale());
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].class_id, 0);
    assert_eq!(items[0].bbox, [90.0, 90.0, 110.0, 110.0]);
    assert_eq!(items[1].class_id, 1);
    assert_eq!(items[1].score, 0.7);
  }

  #[test]
  fn end_to_end_rows_are_scaled_to_frame() {
    let data = vec![
      64.0, 64.0, 320.0, 320.0, 0.8, 1.0, //
      0.0, 0.0, 10.0, 10.0, 0.01, 0.0,
    ];
    let scale = InputScale::stretched(1280, 320, 640);
    let items = decode_end_to_end(&data, 2, 0.05, &scale);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].bbox, [128.0, 32.0, 640.0, 160.0]);
    assert_eq!(items[0].class_id, 1);
  }

  #[test]
  fn boxes_are_clamped_to_frame() {
    let data = vec![-50.0, -50.0, 700.0, 700.0, 0.9, 0.0];
    let items = decode_end_to_end(&data, 1, 0.1, &unit_scale());
    assert_eq!(items[0].bbox, [0.0, 0.0, 640.0, 640.0]);
  }

  #[test]
  fn nms_only_suppresses_within_a_class() {
    let items = vec![
      RawPrediction::new([0.0, 0.0, 10.0, 10.0], 0, 0.6),
      RawPrediction::new([1.0, 1.0, 10.0, 10.0], 0, 0.9),
      RawPrediction::new([0.0, 0.0, 10.0, 10.0], 1, 0.5),
      RawPrediction::new([50.0, 50.0, 60.0, 60.0], 0, 0.4),
    ];
    let kept = nms(items, 0.5);
    let scores: Vec<f32> = kept.iter().map(|p| p.score).collect();
    assert_eq!(scores, vec![0.9, 0.5, 0.4]);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
    assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[1.0, 0.0, 3.0, 2.0]) - 1.0 / 3.0).abs() < 1e-6);
  }
}
