// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/detector.rs - 遇险人员检测流水线
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

//! # 检测流水线
//!
//! 每帧的处理过程：
//! 1. 将帧转换为模型输入并推理，得到各检测头的原始输出；
//! 2. 对每行类别分数取 argmax，分数高于置信度阈值的行转换为像素坐标候选框；
//! 3. 将所有检测头的候选框合并后做 NMS；
//! 4. 类别 0（person）标记为 `VICTIM` 并计数，其余类别查标签表。
//!
//! 流水线不保存任何跨帧状态，同一帧输入总是得到同样的结果。

use thiserror::Error;
use tracing::debug;

use crate::{
  frame::Frame,
  labels::ClassLabels,
  model::{Model, ModelError, RAW_BOX_FIELDS, RawOutput, prepare_input},
};

mod nms;
pub use self::nms::{BBox, NmsPolicy, non_max_suppression};

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// 约定为 person 的类别下标
pub const VICTIM_CLASS_ID: usize = 0;
pub const VICTIM_LABEL: &str = "VICTIM";

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("类别下标 {class_id} 超出标签表范围（共 {len} 个类别）")]
  LabelIndexError { class_id: usize, len: usize },
  #[error(transparent)]
  Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub nms_policy: NmsPolicy,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      nms_policy: NmsPolicy::default(),
    }
  }
}

impl DetectorConfig {
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn with_nms_policy(mut self, policy: NmsPolicy) -> Self {
    self.nms_policy = policy;
    self
  }
}

/// 通过置信度阈值的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: BBox,
  pub class_id: usize,
  pub confidence: f32,
}

/// NMS 之后保留下来的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct FinalDetection {
  pub bbox: BBox,
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
}

impl FinalDetection {
  pub fn is_victim(&self) -> bool {
    self.class_id == VICTIM_CLASS_ID
  }
}

/// 一帧的检测结果；`detections` 的顺序没有约定含义
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResult {
  pub detections: Vec<FinalDetection>,
  pub victim_count: usize,
}

impl FrameResult {
  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

/// 最高类别分数及其下标，同分取第一个；全部为 NaN 时返回 None
fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (idx, &score) in scores.iter().enumerate() {
    if best.is_none_or(|(_, s)| score > s) && !score.is_nan() {
      best = Some((idx, score));
    }
  }
  best
}

/// 把所有检测头中分数超过阈值的行转换为像素坐标候选框
///
/// 坐标一律截断取整。
pub fn decode_candidates(
  outputs: &[RawOutput],
  width: usize,
  height: usize,
  confidence_threshold: f32,
) -> Vec<Candidate> {
  let (fw, fh) = (width as f32, height as f32);
  let mut candidates = Vec::new();

  for output in outputs {
    for row in output.rows() {
      let Some((class_id, confidence)) = best_class(&row[RAW_BOX_FIELDS..]) else {
        continue;
      };
      if confidence <= confidence_threshold {
        continue;
      }

      let center_x = (row[0] * fw) as i32;
      let center_y = (row[1] * fh) as i32;
      let w = (row[2] * fw) as i32;
      let h = (row[3] * fh) as i32;
      let x = (center_x as f32 - w as f32 / 2.0) as i32;
      let y = (center_y as f32 - h as f32 / 2.0) as i32;

      candidates.push(Candidate {
        bbox: BBox::new(x, y, w, h),
        class_id,
        confidence,
      });
    }
  }

  candidates
}

/// 给保留下来的候选框打标签并统计遇险人员数量
pub fn label_detections(
  survivors: Vec<Candidate>,
  labels: &ClassLabels,
) -> Result<FrameResult, DetectError> {
  let mut result = FrameResult {
    detections: Vec::with_capacity(survivors.len()),
    victim_count: 0,
  };

  for Candidate {
    bbox,
    class_id,
    confidence,
  } in survivors
  {
    let label = if class_id == VICTIM_CLASS_ID {
      result.victim_count += 1;
      VICTIM_LABEL.to_string()
    } else {
      labels
        .get(class_id)
        .ok_or(DetectError::LabelIndexError {
          class_id,
          len: labels.len(),
        })?
        .to_string()
    };

    result.detections.push(FinalDetection {
      bbox,
      class_id,
      label,
      confidence,
    });
  }

  Ok(result)
}

/// 遇险人员检测器
///
/// 持有加载好的模型与标签表，构建后只读使用。
pub struct VictimDetector<M> {
  model: M,
  labels: ClassLabels,
  config: DetectorConfig,
}

impl<M: Model> VictimDetector<M> {
  pub fn new(model: M, labels: ClassLabels, config: DetectorConfig) -> Self {
    Self {
      model,
      labels,
      config,
    }
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn labels(&self) -> &ClassLabels {
    &self.labels
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn process_frame(&self, frame: &Frame) -> Result<FrameResult, DetectError> {
    let tensor = prepare_input(frame, &self.model.input_spec())?;
    let outputs = self.model.infer(&tensor)?;
    self.postprocess(&outputs, frame.width(), frame.height())
  }

  pub fn postprocess(
    &self,
    outputs: &[RawOutput],
    width: usize,
    height: usize,
  ) -> Result<FrameResult, DetectError> {
    let candidates = decode_candidates(outputs, width, height, self.config.confidence_threshold);
    let num_candidates = candidates.len();
    let survivors =
      non_max_suppression(candidates, self.config.nms_threshold, self.config.nms_policy);
    debug!("候选框 {} 个，NMS 后保留 {} 个", num_candidates, survivors.len());

    label_detections(survivors, &self.labels)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(cx: f32, cy: f32, w: f32, h: f32, scores: &[f32]) -> Vec<f32> {
    let mut r = vec![cx, cy, w, h, 1.0];
    r.extend_from_slice(scores);
    r
  }

  fn head(rows: &[Vec<f32>]) -> RawOutput {
    RawOutput::from_rows(rows).unwrap()
  }

  #[test]
  fn decodes_to_truncated_pixels() {
    let out = head(&[row(0.5, 0.5, 0.25, 0.5, &[0.1, 0.9, 0.2])]);
    let c = decode_candidates(&[out], 641, 481, 0.5);
    assert_eq!(c.len(), 1);
    // cx = 320, cy = 240, w = 160, h = 240
    assert_eq!(c[0].bbox, BBox::new(240, 120, 160, 240));
    assert_eq!(c[0].class_id, 1);
    assert_eq!(c[0].confidence, 0.9);
  }

  #[test]
  fn center_reconstructs_within_truncation() {
    let rows: Vec<Vec<f32>> = (1..20)
      .map(|i| {
        let f = i as f32 / 20.0;
        row(f, 1.0 - f, 0.13 * f, 0.07 + f / 3.0, &[0.8])
      })
      .collect();
    let (width, height) = (637usize, 479usize);
    for (c, r) in decode_candidates(&[head(&rows)], width, height, 0.5)
      .iter()
      .zip(&rows)
    {
      let cx = (r[0] * width as f32) as i32;
      let cy = (r[1] * height as f32) as i32;
      let rx = c.bbox.x as f32 + c.bbox.width as f32 / 2.0;
      let ry = c.bbox.y as f32 + c.bbox.height as f32 / 2.0;
      assert!((rx - cx as f32).abs() <= 1.0, "{rx} vs {cx}");
      assert!((ry - cy as f32).abs() <= 1.0, "{ry} vs {cy}");
    }
  }

  #[test]
  fn threshold_is_strict() {
    let out = head(&[row(0.5, 0.5, 0.1, 0.1, &[0.5]), row(0.5, 0.5, 0.1, 0.1, &[0.3])]);
    assert!(decode_candidates(&[out], 100, 100, 0.5).is_empty());
  }

  #[test]
  fn lowering_threshold_only_adds_candidates() {
    let scores = [0.2, 0.35, 0.5, 0.55, 0.7, 0.95];
    let rows: Vec<Vec<f32>> = scores
      .iter()
      .enumerate()
      .map(|(i, &s)| row(0.1 * (i + 1) as f32, 0.5, 0.05, 0.05, &[s, 0.0]))
      .collect();
    let out = [head(&rows)];

    let mut previous: Vec<Candidate> = Vec::new();
    for threshold in [0.9, 0.6, 0.5, 0.4, 0.1] {
      let current = decode_candidates(&out, 200, 200, threshold);
      assert!(previous.iter().all(|p| current.contains(p)));
      assert!(current.len() >= previous.len());
      previous = current;
    }
  }

  #[test]
  fn argmax_takes_first_maximum() {
    assert_eq!(best_class(&[0.2, 0.7, 0.7]), Some((1, 0.7)));
    assert_eq!(best_class(&[f32::NAN, 0.6]), Some((1, 0.6)));
    assert_eq!(best_class(&[f32::NAN]), None);
  }

  #[test]
  fn candidates_from_all_heads_are_merged() {
    let a = head(&[row(0.2, 0.2, 0.1, 0.1, &[0.9, 0.0])]);
    let b = head(&[
      row(0.7, 0.7, 0.1, 0.1, &[0.0, 0.8, 0.0]),
      row(0.7, 0.7, 0.1, 0.1, &[0.0, 0.1, 0.0]),
    ]);
    let c = decode_candidates(&[a, b], 100, 100, 0.5);
    assert_eq!(c.len(), 2);
    assert_eq!((c[0].class_id, c[1].class_id), (0, 1));
  }

  #[test]
  fn labels_victims_and_others() {
    let labels: ClassLabels = ["person", "bicycle", "car"].into_iter().collect();
    let survivors = vec![
      Candidate {
        bbox: BBox::new(0, 0, 10, 10),
        class_id: 0,
        confidence: 0.9,
      },
      Candidate {
        bbox: BBox::new(50, 50, 10, 10),
        class_id: 2,
        confidence: 0.8,
      },
    ];
    let result = label_detections(survivors, &labels).unwrap();
    assert_eq!(result.victim_count, 1);
    assert_eq!(result.detections[0].label, "VICTIM");
    assert!(result.detections[0].is_victim());
    assert_eq!(result.detections[1].label, "car");
  }

  #[test]
  fn unknown_class_is_label_index_error() {
    let labels: ClassLabels = ["person", "bicycle", "car"].into_iter().collect();
    let survivors = vec![Candidate {
      bbox: BBox::new(0, 0, 10, 10),
      class_id: 5,
      confidence: 0.9,
    }];
    match label_detections(survivors, &labels) {
      Err(DetectError::LabelIndexError { class_id, len }) => assert_eq!((class_id, len), (5, 3)),
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn default_config_matches_reference_thresholds() {
    let config = DetectorConfig::default();
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.nms_threshold, 0.4);
    assert_eq!(config.nms_policy, NmsPolicy::ClassAgnostic);

    let tuned = config
      .with_confidence_threshold(0.3)
      .with_nms_threshold(0.5)
      .with_nms_policy(NmsPolicy::PerClass);
    assert_eq!(tuned.nms_policy, NmsPolicy::PerClass);
    assert_eq!(tuned.confidence_threshold, 0.3);
  }
}
