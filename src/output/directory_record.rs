// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::FrameResult,
  frame::Frame,
  output::{
    Render, StatusLine,
    draw::{Draw, DrawError},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
}

/// 把每帧标注结果按日期存入目录
///
/// `folder:///path?record&always`：`record` 额外写出 JSON 记录，
/// `always` 连没有检测结果的帧也保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  record: bool,
  always: bool,
  frame_counter: AtomicU32,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::from_url(uri)?,
      record,
      always,
      frame_counter: AtomicU32::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:06X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn write_record(
    &self,
    path: &Path,
    result: &FrameResult,
    status: &StatusLine,
  ) -> Result<(), DirectoryRecordOutputError> {
    let detections: Vec<_> = result
      .detections
      .iter()
      .map(|d| {
        json!({
          "label": d.label,
          "class_id": d.class_id,
          "confidence": d.confidence,
          "bbox": [d.bbox.x, d.bbox.y, d.bbox.width, d.bbox.height],
        })
      })
      .collect();
    let record = json!({
      "fps": status.fps,
      "victim_count": result.victim_count,
      "detections": detections,
    });
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(&record)?,
    )?;
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &Frame,
    result: &FrameResult,
    status: &StatusLine,
  ) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    self.draw.draw_frame(frame, result, status).save(&path)?;
    if self.record {
      self.write_record(&path, result, status)?;
    }
    debug!("记录帧到: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::detector::{BBox, FinalDetection};

  fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        found.extend(files_with_extension(&path, ext));
      } else if path.extension().is_some_and(|e| e == ext) {
        found.push(path);
      }
    }
    found
  }

  fn victim_result() -> FrameResult {
    FrameResult {
      detections: vec![FinalDetection {
        bbox: BBox::new(1, 1, 4, 4),
        class_id: 0,
        label: "VICTIM".to_string(),
        confidence: 0.9,
      }],
      victim_count: 1,
    }
  }

  #[test]
  fn records_frames_with_detections() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = Frame::from(RgbImage::new(8, 8));
    let status = StatusLine {
      fps: 5.0,
      victims: 1,
    };

    output
      .render_result(&frame, &FrameResult::default(), &status)
      .unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    output
      .render_result(&frame, &victim_result(), &status)
      .unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);

    let records = files_with_extension(dir.path(), "json");
    assert_eq!(records.len(), 1);
    let record: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&records[0]).unwrap()).unwrap();
    assert_eq!(record["victim_count"], 1);
    assert_eq!(record["detections"][0]["label"], "VICTIM");
    assert_eq!(record["detections"][0]["bbox"][2], 4);
  }

  #[test]
  fn always_keeps_empty_frames() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = Frame::from(RgbImage::new(8, 8));
    let status = StatusLine {
      fps: 0.0,
      victims: 0,
    };

    output
      .render_result(&frame, &FrameResult::default(), &status)
      .unwrap();
    output
      .render_result(&frame, &FrameResult::default(), &status)
      .unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 2);
    assert!(files_with_extension(dir.path(), "json").is_empty());
  }
}
