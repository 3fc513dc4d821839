// 该文件是 Shaowang （哨望） 项目的一部分。
// src/annotate.rs - 检测结果标注
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

use std::collections::HashMap;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detector::DetectionSet;
use crate::frame::Frame;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 22;
const LABEL_CHAR_WIDTH: f32 = 10.0; // 无字体时每字符平均宽度（粗略估计）
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const DEFAULT_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

const RATE_FONT_SIZE: f32 = 22.0;
const RATE_POSITION: (i32, i32) = (20, 20);
const RATE_COLOR: [u8; 3] = [0, 255, 0];

// 内置字体，系统字体与 `--font` 均可覆盖
static EMBEDDED_FONT: &[u8] = include_bytes!("../assets/font.ttf");

const FONT_SEARCH_PATHS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontIo {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
  #[error("无效的颜色: {0}")]
  InvalidColor(String),
}

/// 标签到颜色的映射，未知标签使用默认颜色
#[derive(Debug, Clone)]
pub struct ColorMap {
  colors: HashMap<String, [u8; 3]>,
  default: [u8; 3],
}

impl Default for ColorMap {
  fn default() -> Self {
    let colors = [
      ("fire", [255, 0, 0]),
      ("smoke", [0, 0, 255]),
      ("weapon", [255, 140, 0]),
      ("masked", [0, 255, 0]),
      ("unmasked", [255, 0, 0]),
      ("person", [255, 255, 0]),
      ("violence", [255, 0, 255]),
    ]
    .into_iter()
    .map(|(label, color)| (label.to_string(), color))
    .collect();

    Self {
      colors,
      default: DEFAULT_COLOR,
    }
  }
}

impl ColorMap {
  pub fn with(mut self, label: &str, color: [u8; 3]) -> Self {
    self.colors.insert(label.to_string(), color);
    self
  }

  /// 解析 `label=RRGGBB` 形式的颜色覆盖
  pub fn with_override(self, entry: &str) -> Result<Self, AnnotateError> {
    let (label, hex) = entry
      .split_once('=')
      .ok_or_else(|| AnnotateError::InvalidColor(entry.to_string()))?;
    let color = parse_hex_color(hex).ok_or_else(|| AnnotateError::InvalidColor(entry.to_string()))?;
    Ok(self.with(label.trim(), color))
  }

  pub fn color_for(&self, label: &str) -> Rgb<u8> {
    Rgb(self.colors.get(label).copied().unwrap_or(self.default))
  }
}

fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
  let hex = hex.trim().trim_start_matches('#');
  if hex.len() != 6 {
    return None;
  }
  let value = u32::from_str_radix(hex, 16).ok()?;
  Some([(value >> 16) as u8, (value >> 8) as u8, value as u8])
}

/// 帧率文本，保留两位小数
pub fn rate_text(rate: f64) -> String {
  format!("FPS: {:.2}", rate)
}

/// 标注器：只负责绘制，不含任何检测逻辑
pub struct Annotator {
  font: Option<FontArc>,
  font_size: f32,
  colors: ColorMap,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::embedded()
  }
}

impl Annotator {
  pub fn new(font: Option<FontArc>, colors: ColorMap) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      colors,
    }
  }

  /// 不加载字体，只绘制边框与标签底色
  pub fn without_font() -> Self {
    Self::new(None, ColorMap::default())
  }

  /// 使用随程序打包的字体
  pub fn embedded() -> Self {
    match FontArc::try_from_slice(EMBEDDED_FONT) {
      Ok(font) => Self::new(Some(font), ColorMap::default()),
      Err(e) => {
        warn!("内置字体无效，标注将不包含文字: {}", e);
        Self::without_font()
      }
    }
  }

  pub fn with_font_file(path: &Path) -> Result<Self, AnnotateError> {
    let data = std::fs::read(path).map_err(|source| AnnotateError::FontIo {
      path: path.display().to_string(),
      source,
    })?;
    let font = FontArc::try_from_vec(data).map_err(|e| AnnotateError::InvalidFont(e.to_string()))?;
    info!("已加载字体: {}", path.display());
    Ok(Self::new(Some(font), ColorMap::default()))
  }

  /// 在常见系统路径中查找字体，找不到时回退到内置字体
  pub fn with_system_font() -> Self {
    for path in FONT_SEARCH_PATHS {
      let path = Path::new(path);
      if path.exists() {
        match Self::with_font_file(path) {
          Ok(annotator) => return annotator,
          Err(e) => debug!("跳过字体 {}: {}", path.display(), e),
        }
      }
    }
    debug!("未找到系统字体，使用内置字体");
    Self::embedded()
  }

  pub fn colors(mut self, colors: ColorMap) -> Self {
    self.colors = colors;
    self
  }

  pub fn font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在帧上绘制全部检测结果
  pub fn draw<'f>(&self, frame: &'f mut Frame, detections: &DetectionSet) -> &'f mut Frame {
    for detection in detections {
      let color = self.colors.color_for(&detection.label);
      let text = format!("{} ({:.2}%)", detection.label, detection.confidence);
      if let Some((x, y)) = draw_box(&mut frame.image, &detection.bbox, color) {
        self.draw_label(&mut frame.image, x, y, &text, color);
      }
    }
    frame
  }

  /// 在固定位置写出当前帧率
  pub fn overlay_rate<'f>(&self, frame: &'f mut Frame, rate: f64) -> &'f mut Frame {
    if let Some(font) = &self.font {
      draw_text_mut(
        &mut frame.image,
        Rgb(RATE_COLOR),
        RATE_POSITION.0,
        RATE_POSITION.1,
        PxScale::from(RATE_FONT_SIZE),
        font,
        &rate_text(rate),
      );
    }
    frame
  }

  // 标签锚定在边框左上角；上方空间不足时放到框内
  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = match &self.font {
      Some(font) => {
        let (w, h) = text_size(scale, font, text);
        (w as i32 + 2 * LABEL_TEXT_PADDING, h as i32 + 2 * LABEL_TEXT_PADDING)
      }
      None => (
        (text.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32,
        LABEL_TEXT_HEIGHT,
      ),
    };

    let label_x = x.max(0);
    let label_y = if y - text_height >= 0 { y - text_height } else { y };

    let max_width = (image.width() as i32 - label_x).max(0);
    let max_height = (image.height() as i32 - label_y).max(0);
    let label_width = text_width.min(max_width);
    let label_height = text_height.min(max_height);

    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        scale,
        font,
        text,
      );
    }
  }
}

/// 绘制加粗边框，返回裁剪后的左上角；边框退化时返回 None
fn draw_box(image: &mut RgbImage, bbox: &[f32; 4], color: Rgb<u8>) -> Option<(i32, i32)> {
  let (w, h) = (image.width() as i32, image.height() as i32);
  if w == 0 || h == 0 {
    return None;
  }

  let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
  let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
  let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
  let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

  if x_min >= x_max || y_min >= y_max {
    return None;
  }

  for t in 0..BOX_THICKNESS {
    let width = x_max - x_min + 1 - 2 * t;
    let height = y_max - y_min + 1 - 2 * t;
    if width <= 0 || height <= 0 {
      break;
    }
    let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
    draw_hollow_rect_mut(image, rect, color);
  }

  Some((x_min, y_min))
}
