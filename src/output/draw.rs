// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  detector::{BBox, FinalDetection, FrameResult},
  frame::Frame,
  output::StatusLine,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const STATUS_FONT_SIZE: f32 = 22.0;
const STATUS_POSITION: (i32, i32) = (10, 12); // 文本上边缘，基线约在 y = 30

const VICTIM_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const OBJECT_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const STATUS_COLOR: [u8; 3] = [0, 255, 255]; // 青色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 绘制边界框、标签与状态行
///
/// 未配置字体时只绘制边界框。
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let font = FontArc::try_from_vec(std::fs::read(path)?)?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 读取 URI 中的 `font` 参数
  pub fn from_url(url: &Url) -> Result<Self, DrawError> {
    match url.query_pairs().find(|(k, _)| k == "font") {
      Some((_, path)) => Self::with_font_file(path.into_owned()),
      None => Ok(Self::default()),
    }
  }

  pub fn draw_frame(&self, frame: &Frame, result: &FrameResult, status: &StatusLine) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for detection in &result.detections {
      self.draw_detection(&mut image, detection);
    }
    if let Some(font) = &self.font {
      draw_text_mut(
        &mut image,
        Rgb(STATUS_COLOR),
        STATUS_POSITION.0,
        STATUS_POSITION.1,
        PxScale::from(STATUS_FONT_SIZE),
        font,
        &status.to_string(),
      );
    }
    image
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &FinalDetection) {
    let color = if detection.is_victim() {
      VICTIM_COLOR
    } else {
      OBJECT_COLOR
    };
    let Some((left, top, right, bottom)) =
      edges_in_view(detection.bbox, image.width(), image.height())
    else {
      return;
    };

    // 边框加粗为 2 像素，越界部分由 imageproc 裁剪
    let rect = Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
    draw_hollow_rect_mut(image, rect, Rgb(color));
    if right - left > 1 && bottom - top > 1 {
      let inner =
        Rect::at(left + 1, top + 1).of_size((right - left - 1) as u32, (bottom - top - 1) as u32);
      draw_hollow_rect_mut(image, inner, Rgb(color));
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", detection.label, detection.confidence);
    let w = image.width() as i32;
    let label_x = left.clamp(0, (w - 1).max(0));
    let label_y = top.saturating_sub(self.label_text_height).max(0);
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let label_width = text_width.min(w - label_x).max(0) as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, self.label_text_height as u32);
      draw_filled_rect_mut(image, rect, Rgb(color));
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

/// 边界框四条边的坐标，画面外的边收拢到紧贴画面之外
///
/// 两层边框都留在画面外，因此裁剪前后绘制结果一致；完全不可见时返回 `None`。
fn edges_in_view(bbox: BBox, width: u32, height: u32) -> Option<(i32, i32, i32, i32)> {
  if bbox.width <= 0 || bbox.height <= 0 {
    return None;
  }
  let (w, h) = (i64::from(width), i64::from(height));
  let x0 = i64::from(bbox.x);
  let y0 = i64::from(bbox.y);
  let x1 = x0 + i64::from(bbox.width) - 1;
  let y1 = y0 + i64::from(bbox.height) - 1;
  if x1 < 0 || y1 < 0 || x0 >= w || y0 >= h {
    return None;
  }
  Some((
    x0.max(-2) as i32,
    y0.max(-2) as i32,
    x1.min(w + 1) as i32,
    y1.min(h + 1) as i32,
  ))
}
