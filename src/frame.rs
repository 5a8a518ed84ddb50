// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/frame.rs - HWC 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("不支持的通道数: {0}")]
  UnsupportedChannels(usize),
  #[error("帧尺寸为空")]
  EmptyFrame,
}

/// 像素通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 一帧图像，按 HWC 排布的 `u8` 数据
///
/// 帧在一次检测调用期间只被借用，不会被修改。
#[derive(Debug, Clone)]
pub struct Frame {
  width: usize,
  height: usize,
  channels: usize,
  order: ChannelOrder,
  data: Box<[u8]>,
}

impl Frame {
  pub fn from_raw(
    width: usize,
    height: usize,
    channels: usize,
    order: ChannelOrder,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame);
    }
    if !matches!(channels, 1 | 3 | 4) {
      return Err(FrameError::UnsupportedChannels(channels));
    }
    let expected = width * height * channels;
    if data.len() != expected {
      return Err(FrameError::ShapeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      channels,
      order,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  /// 读取 (x, y) 处的像素，按 RGB 顺序返回
  ///
  /// 单通道帧复制为三个通道，四通道帧忽略 alpha。
  pub fn rgb_at(&self, x: usize, y: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * self.channels;
    let px = &self.data[idx..idx + self.channels];
    match (self.channels, self.order) {
      (1, _) => [px[0], px[0], px[0]],
      (_, ChannelOrder::Rgb) => [px[0], px[1], px[2]],
      (_, ChannelOrder::Bgr) => [px[2], px[1], px[0]],
    }
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      Rgb(self.rgb_at(x as usize, y as usize))
    })
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      channels: 3,
      order: ChannelOrder::Rgb,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}
