// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use xunjiu::{
  FromUrl,
  detector::VictimDetector,
  input::InputWrapper,
  labels::ClassLabels,
  model::TractYoloBuilder,
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("标签文件路径: {}", args.labels.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {}", args.nms_threshold);

  // 模型与标签缺失时无法继续
  let model = TractYoloBuilder::from_url(&args.model)
    .and_then(|builder| builder.build())
    .inspect_err(|e| error!("模型加载失败，请确认模型文件位置: {}", e))?;
  let labels = ClassLabels::load(&args.labels)
    .inspect_err(|e| error!("标签加载失败，请确认标签文件位置: {}", e))?;
  let detector = VictimDetector::new(model, labels, args.detector_config());
  info!("检测器初始化完成");

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let summary = if args.oneshot {
    OneShotTask.run_task(input, detector, output)?
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_limit())
      .with_skip_failed_frames(args.skip_failed_frames)
      .interrupt_on_ctrlc()?
      .run_task(input, detector, output)?
  };

  info!(
    "处理完成: {} 帧, 跳过 {} 帧, 累计遇险人员 {} 人次",
    summary.frames, summary.skipped, summary.total_victims
  );

  Ok(())
}
