// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/model.rs - 模型接口
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

use std::{fmt::Display, path::Path};

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{ChannelOrder, Frame};

const YOLO_INPUT_W: usize = 416;
const YOLO_INPUT_H: usize = 416;
const YOLO_INPUT_SCALE: f32 = 1.0 / 255.0;
const YOLO_INPUT_CHANNELS: usize = 3;

/// 每行前 5 个值为 cx, cy, w, h, objectness，之后至少一个类别分数
pub const RAW_BOX_FIELDS: usize = 5;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {path}: {reason}")]
  ModelLoadError { path: String, reason: String },
  #[error("推理错误: {0}")]
  InferenceError(String),
}

impl ModelError {
  pub fn load(path: &Path, reason: impl Display) -> Self {
    ModelError::ModelLoadError {
      path: path.display().to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn inference(reason: impl Display) -> Self {
    ModelError::InferenceError(reason.to_string())
  }
}

/// 模型固定的输入约定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSpec {
  pub width: usize,
  pub height: usize,
  pub scale: f32,
  pub channel_order: ChannelOrder,
}

impl Default for InputSpec {
  fn default() -> Self {
    Self {
      width: YOLO_INPUT_W,
      height: YOLO_INPUT_H,
      scale: YOLO_INPUT_SCALE,
      channel_order: ChannelOrder::Rgb,
    }
  }
}

/// batch 为 1 的 NCHW 浮点张量
#[derive(Debug, Clone)]
pub struct InputTensor {
  shape: [usize; 4],
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data.into_vec()
  }
}

/// 直接缩放到模型分辨率（不裁剪、不保持宽高比），乘以缩放因子，必要时交换通道
pub fn prepare_input(frame: &Frame, spec: &InputSpec) -> Result<InputTensor, ModelError> {
  if spec.width == 0 || spec.height == 0 {
    return Err(ModelError::inference(format!(
      "模型输入尺寸无效: {}x{}",
      spec.width, spec.height
    )));
  }

  let image = frame.to_rgb_image();
  let resized = if image.width() as usize == spec.width && image.height() as usize == spec.height {
    image
  } else {
    imageops::resize(
      &image,
      spec.width as u32,
      spec.height as u32,
      FilterType::Triangle,
    )
  };

  let plane = spec.width * spec.height;
  let mut data = vec![0.0f32; YOLO_INPUT_CHANNELS * plane];
  for (x, y, pixel) in resized.enumerate_pixels() {
    let idx = y as usize * spec.width + x as usize;
    for c in 0..YOLO_INPUT_CHANNELS {
      let src = match spec.channel_order {
        ChannelOrder::Rgb => c,
        ChannelOrder::Bgr => YOLO_INPUT_CHANNELS - 1 - c,
      };
      data[c * plane + idx] = pixel[src] as f32 * spec.scale;
    }
  }

  debug!(
    "输入张量: {}x{} -> 1x{}x{}x{}",
    frame.width(),
    frame.height(),
    YOLO_INPUT_CHANNELS,
    spec.height,
    spec.width
  );

  Ok(InputTensor {
    shape: [1, YOLO_INPUT_CHANNELS, spec.height, spec.width],
    data: data.into_boxed_slice(),
  })
}

/// 一个检测头的原始输出，每行一个锚点
#[derive(Debug, Clone)]
pub struct RawOutput {
  stride: usize,
  data: Box<[f32]>,
}

impl RawOutput {
  pub fn new(stride: usize, data: Vec<f32>) -> Result<Self, ModelError> {
    if stride <= RAW_BOX_FIELDS {
      return Err(ModelError::inference(format!(
        "输出行宽 {} 不足以容纳类别分数",
        stride
      )));
    }
    if data.len() % stride != 0 {
      return Err(ModelError::inference(format!(
        "输出长度 {} 不是行宽 {} 的整数倍",
        data.len(),
        stride
      )));
    }
    Ok(Self {
      stride,
      data: data.into_boxed_slice(),
    })
  }

  /// 由若干行构造，各行长度必须一致
  pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, ModelError> {
    let stride = rows.first().map(|r| r.as_ref().len()).unwrap_or(RAW_BOX_FIELDS + 1);
    let mut data = Vec::with_capacity(stride * rows.len());
    for row in rows {
      let row = row.as_ref();
      if row.len() != stride {
        return Err(ModelError::inference(format!(
          "输出行宽不一致: {} != {}",
          row.len(),
          stride
        )));
      }
      data.extend_from_slice(row);
    }
    Self::new(stride, data)
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn num_rows(&self) -> usize {
    self.data.len() / self.stride
  }

  pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(self.stride)
  }
}

/// 外部提供的检测网络
pub trait Model {
  fn input_spec(&self) -> InputSpec;

  /// 前向推理，每个终端检测头返回一个 [`RawOutput`]
  fn infer(&self, input: &InputTensor) -> Result<Vec<RawOutput>, ModelError>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn input_spec(&self) -> InputSpec {
    (**self).input_spec()
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<RawOutput>, ModelError> {
    (**self).infer(input)
  }
}

#[cfg(feature = "tract")]
mod tract_yolo;
#[cfg(feature = "tract")]
pub use self::tract_yolo::{TractYolo, TractYoloBuilder};
