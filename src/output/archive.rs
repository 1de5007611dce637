// 该文件是 Quyu （区域特征） 项目的一部分。
// src/output/archive.rs - 单文件归档输出
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

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::output::{OutputError, Persist, RecordFormat, RegionRecord};

/// 归档内容：图像文件名 -> 记录
pub type RegionArchive = BTreeMap<String, RegionRecord>;

/// 把一个分片的全部结果累积在内存里，`finish` 时一次性写出。
/// 进程在 `finish` 之前退出会丢失整个分片的结果。
pub struct ArchiveOutput {
  path: PathBuf,
  format: RecordFormat,
  records: RegionArchive,
}

impl ArchiveOutput {
  pub fn new(path: PathBuf, format: RecordFormat) -> Self {
    ArchiveOutput {
      path,
      format,
      records: BTreeMap::new(),
    }
  }

  /// 按归档路径的扩展名决定格式，与 [`ArchiveOutput::load`] 一致
  pub fn for_path(path: PathBuf) -> Result<Self, OutputError> {
    let format = RecordFormat::from_path(&path)?;
    Ok(Self::new(path, format))
  }

  pub fn format(&self) -> RecordFormat {
    self.format
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn load(path: &Path) -> Result<RegionArchive, OutputError> {
    RecordFormat::from_path(path)?.read_file(path)
  }
}

impl Persist for ArchiveOutput {
  type Error = OutputError;

  fn persist(&mut self, _artifact: &Path, record: RegionRecord) -> Result<(), Self::Error> {
    debug!("归档累积: {}", record.image_name);
    self.records.insert(record.image_name.clone(), record);
    Ok(())
  }

  fn finish(self) -> Result<(), Self::Error> {
    info!(
      "写出归档: {} ({} 张图像)",
      self.path.display(),
      self.records.len()
    );
    self.format.write_file(&self.path, &self.records)
  }

  fn abandon(self) -> Result<(), Self::Error> {
    warn!(
      "任务中断，归档不写出: {} (丢弃 {} 张图像的结果)",
      self.path.display(),
      self.records.len()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn record(name: &str) -> RegionRecord {
    RegionRecord {
      image_name: name.to_string(),
      image_id: Some(1),
      image_w: 2,
      image_h: 2,
      num_boxes: 0,
      boxes: vec![],
      features: vec![],
      confidences: vec![],
      labels: vec![],
    }
  }

  #[test]
  fn nothing_is_written_before_finish() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shard.json");
    let mut output = ArchiveOutput::new(path.clone(), RecordFormat::Json);
    output.persist(Path::new("ignored"), record("b.jpg")).unwrap();
    output.persist(Path::new("ignored"), record("a.jpg")).unwrap();
    assert_eq!(output.len(), 2);
    assert!(!path.exists());

    output.finish().unwrap();
    let archive = ArchiveOutput::load(&path).unwrap();
    assert_eq!(
      archive.keys().cloned().collect::<Vec<_>>(),
      vec!["a.jpg", "b.jpg"]
    );
  }

  #[cfg(feature = "bincode_record")]
  #[test]
  fn bincode_archive_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/shard.bin");
    let mut output = ArchiveOutput::new(path.clone(), RecordFormat::Bincode);
    output.persist(Path::new("ignored"), record("a.jpg")).unwrap();
    output.finish().unwrap();
    assert_eq!(ArchiveOutput::load(&path).unwrap()["a.jpg"], record("a.jpg"));
  }

  #[test]
  fn archive_format_follows_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shard0.json");
    let mut output = ArchiveOutput::for_path(path.clone()).unwrap();
    assert_eq!(output.format(), RecordFormat::Json);
    output.persist(Path::new("ignored"), record("a.jpg")).unwrap();
    output.finish().unwrap();
    assert_eq!(ArchiveOutput::load(&path).unwrap().len(), 1);

    #[cfg(feature = "bincode_record")]
    {
      let path = dir.path().join("shard0.bin");
      let mut output = ArchiveOutput::for_path(path.clone()).unwrap();
      assert_eq!(output.format(), RecordFormat::Bincode);
      output.persist(Path::new("ignored"), record("b.jpg")).unwrap();
      output.finish().unwrap();
      assert!(ArchiveOutput::load(&path).unwrap().contains_key("b.jpg"));
    }

    assert!(matches!(
      ArchiveOutput::for_path(dir.path().join("shard0.pt")),
      Err(OutputError::UnknownFormat(_))
    ));
  }

  #[test]
  fn abandoned_archive_is_not_written() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shard.json");
    let mut output = ArchiveOutput::new(path.clone(), RecordFormat::Json);
    output.persist(Path::new("ignored"), record("a.jpg")).unwrap();
    output.abandon().unwrap();
    assert!(!path.exists());
  }
}
