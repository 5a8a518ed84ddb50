// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use xunjiu::detector::{DetectorConfig, NmsPolicy};

/// 寻救：灾害现场遇险人员检测演示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 onnx:///models/yolov3.onnx?size=416
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 换行分隔的类别名称文件（如 coco.names）
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,

  /// 输入来源
  /// - 图片: image:///path/to/scene.jpg
  /// - 视频: gst://file/path/to/video.mp4
  /// - 摄像头: gst://camera/dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// - 图片: image:///path/to/out.png?font=/path/to/font.ttf
  /// - 目录: folder:///path/to/records?record&always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.4, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 按类别分别做 NMS（默认不区分类别）
  #[arg(long)]
  pub nms_per_class: bool,

  /// 最大处理帧数，0 表示无限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: usize,

  /// 推理失败时跳过该帧而不是退出
  #[arg(long)]
  pub skip_failed_frames: bool,

  /// 只处理第一帧
  #[arg(long)]
  pub oneshot: bool,
}

impl Args {
  pub fn detector_config(&self) -> DetectorConfig {
    let policy = if self.nms_per_class {
      NmsPolicy::PerClass
    } else {
      NmsPolicy::ClassAgnostic
    };
    DetectorConfig::default()
      .with_confidence_threshold(self.confidence)
      .with_nms_threshold(self.nms_threshold)
      .with_nms_policy(policy)
  }

  pub fn frame_limit(&self) -> Option<usize> {
    (self.frame_number > 0).then_some(self.frame_number)
  }
}
