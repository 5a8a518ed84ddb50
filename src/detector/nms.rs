// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/detector/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use super::Candidate;

/// 抑制时是否区分类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsPolicy {
  /// 只看空间重叠，不同类别的框也会互相抑制
  #[default]
  ClassAgnostic,
  /// 仅在同一类别内抑制
  PerClass,
}

/// 像素坐标下的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BBox {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn area(&self) -> i64 {
    self.width.max(0) as i64 * self.height.max(0) as i64
  }

  pub fn intersection(&self, other: &BBox) -> i64 {
    let x1 = self.x.max(other.x) as i64;
    let y1 = self.y.max(other.y) as i64;
    let x2 = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
    let y2 = (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);
    (x2 - x1).max(0) * (y2 - y1).max(0)
  }

  /// 交并比；并集为零时返回 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let intersection = self.intersection(other);
    let union = self.area() + other.area() - intersection;
    if union > 0 {
      intersection as f32 / union as f32
    } else {
      0.0
    }
  }
}

/// 贪心 NMS：按置信度降序（同分保持原顺序），IoU >= 阈值即被抑制
pub fn non_max_suppression(
  mut candidates: Vec<Candidate>,
  iou_threshold: f32,
  policy: NmsPolicy,
) -> Vec<Candidate> {
  candidates.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(Ordering::Equal)
  });

  let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept.iter().any(|k| {
      let comparable = match policy {
        NmsPolicy::ClassAgnostic => true,
        NmsPolicy::PerClass => k.class_id == candidate.class_id,
      };
      comparable && k.bbox.iou(&candidate.bbox) >= iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}
