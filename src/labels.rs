// 该文件是 Xunjiu （寻救） 项目的一部分。
// src/labels.rs - 类别标签表
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

use tracing::{debug, info};

use crate::model::ModelError;

/// 按行排列的类别名称，`class_id` 为从 0 开始的下标
#[derive(Debug, Clone, Default)]
pub struct ClassLabels {
  names: Vec<String>,
}

impl ClassLabels {
  /// 从换行分隔的标签文件加载
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    info!("加载类别标签文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| ModelError::load(path, e))?;

    let labels = Self::parse(&content);
    if labels.is_empty() {
      return Err(ModelError::load(path, "标签文件中没有任何类别"));
    }

    debug!("类别数量: {}", labels.len());
    Ok(labels)
  }

  fn parse(content: &str) -> Self {
    let mut names: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
    while names.last().is_some_and(|n| n.is_empty()) {
      names.pop();
    }
    Self { names }
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl<S: Into<String>> FromIterator<S> for ClassLabels {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn trims_lines_and_trailing_blanks() {
    let labels = ClassLabels::parse("person \r\nbicycle\n car\n\n\n");
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.get(0), Some("person"));
    assert_eq!(labels.get(2), Some("car"));
    assert_eq!(labels.get(3), None);
  }

  #[test]
  fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "person\nbicycle\ncar").unwrap();
    let labels = ClassLabels::load(file.path()).unwrap();
    assert_eq!(labels.get(1), Some("bicycle"));
  }

  #[test]
  fn missing_file_is_load_error() {
    let err = ClassLabels::load("/nonexistent/coco.names").unwrap_err();
    match err {
      ModelError::ModelLoadError { path, .. } => assert_eq!(path, "/nonexistent/coco.names"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn empty_file_is_load_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert!(matches!(
      ClassLabels::load(file.path()),
      Err(ModelError::ModelLoadError { .. })
    ));
  }
}
