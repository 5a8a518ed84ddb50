// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/model/tract_yolo.rs - 基于 tract 的 YOLO 推理后端
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

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ChannelOrder,
  model::{InputSpec, InputTensor, Model, ModelError, RawOutput},
};

type YoloPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// ONNX 格式的 YOLO 检测网络
///
/// 网络在构建时加载一次，之后只读使用，随值一起释放。
pub struct TractYolo {
  plan: YoloPlan,
  spec: InputSpec,
}

pub struct TractYoloBuilder {
  model_path: PathBuf,
  spec: InputSpec,
}

impl FromUrlWithScheme for TractYoloBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractYoloBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::load(
        Path::new(url.as_str()),
        format!("模型路径必须使用 {} 方案", Self::SCHEME),
      ));
    }

    let mut builder = TractYoloBuilder::new(url.path());
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "size" => {
          let size = v
            .parse::<usize>()
            .map_err(|e| ModelError::load(&builder.model_path, format!("size 参数无效: {}", e)))?;
          builder.spec.width = size;
          builder.spec.height = size;
        }
        "order" if v.eq_ignore_ascii_case("bgr") => {
          builder.spec.channel_order = ChannelOrder::Bgr;
        }
        _ => {}
      }
    }

    Ok(builder)
  }
}

impl TractYoloBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      spec: InputSpec::default(),
    }
  }

  pub fn input_spec(mut self, spec: InputSpec) -> Self {
    self.spec = spec;
    self
  }

  pub fn build(self) -> Result<TractYolo, ModelError> {
    let path = self.model_path.as_path();
    info!("加载模型文件: {}", path.display());
    if !path.is_file() {
      error!("模型文件不存在: {}", path.display());
      return Err(ModelError::load(path, "模型文件不存在"));
    }

    let input_fact = InferenceFact::dt_shape(
      f32::datum_type(),
      tvec![1, 3, self.spec.height, self.spec.width],
    );
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|model| model.with_input_fact(0, input_fact))
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::load(path, e))?;

    debug!("模型输出数量: {}", plan.model().outputs.len());
    info!("模型加载完成");

    Ok(TractYolo {
      plan,
      spec: self.spec,
    })
  }
}

impl Model for TractYolo {
  fn input_spec(&self) -> InputSpec {
    self.spec
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<RawOutput>, ModelError> {
    debug!("设置模型输入");
    let tensor =
      Tensor::from_shape::<f32>(&input.shape(), input.as_slice()).map_err(ModelError::inference)?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec![tensor.into()])
      .map_err(ModelError::inference)?;

    // 图的输出即未被其他层消费的检测头
    let mut heads = Vec::with_capacity(outputs.len());
    for (idx, output) in outputs.iter().enumerate() {
      let stride = output.shape().last().copied().unwrap_or(0);
      let data = output.as_slice::<f32>().map_err(ModelError::inference)?;
      debug!("检测头 {}: 形状 {:?}", idx, output.shape());
      heads.push(RawOutput::new(stride, data.to_vec())?);
    }

    Ok(heads)
  }
}
