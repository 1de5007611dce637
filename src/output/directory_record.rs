// 该文件是 Quyu （区域特征） 项目的一部分。
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

use tracing::{debug, info};

use crate::output::{OutputError, Persist, RecordFormat, RegionRecord};

/// 每张图像写一个记录文件
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  format: RecordFormat,
  written: usize,
}

impl DirectoryRecordOutput {
  pub fn new(directory: PathBuf, format: RecordFormat) -> Result<Self, OutputError> {
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(DirectoryRecordOutput {
      directory,
      format,
      written: 0,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }
}

impl Persist for DirectoryRecordOutput {
  type Error = OutputError;

  fn persist(&mut self, artifact: &Path, record: RegionRecord) -> Result<(), Self::Error> {
    self.format.write_file(artifact, &record)?;
    self.written += 1;
    debug!("写入记录: {} ({} 个区域)", artifact.display(), record.num_boxes);
    Ok(())
  }

  fn finish(self) -> Result<(), Self::Error> {
    info!(
      "目录输出完成: {} 共写入 {} 个记录",
      self.directory.display(),
      self.written
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn writes_one_file_per_record() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("feats");
    let mut output = DirectoryRecordOutput::new(out.clone(), RecordFormat::Json).unwrap();
    assert!(output.directory().is_dir());

    let record = RegionRecord {
      image_name: "a.jpg".to_string(),
      image_id: None,
      image_w: 8,
      image_h: 6,
      num_boxes: 1,
      boxes: vec![[0.0, 0.0, 4.0, 4.0]],
      features: vec![vec![0.5, 0.25]],
      confidences: vec![0.75],
      labels: vec![3],
    };
    let artifact = out.join("a.jpg.json");
    output.persist(&artifact, record.clone()).unwrap();
    output.finish().unwrap();

    let loaded: RegionRecord = RecordFormat::Json.read_file(&artifact).unwrap();
    assert_eq!(loaded, record);
  }
}
