// 该文件是 Quyu （区域特征） 项目的一部分。
// src/output.rs - 输出定义
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

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{discovery::ImageRef, frame::ImageFrame, selector::KeptSelection};

mod archive;
mod directory_record;

pub use self::archive::{ArchiveOutput, RegionArchive};
pub use self::directory_record::DirectoryRecordOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[cfg(feature = "bincode_record")]
  #[error("bincode 错误: {0}")]
  BincodeError(#[from] bincode::Error),
  #[error("未知的输出格式: {0}")]
  UnknownFormat(String),
}

/// 一张图像的保留区域，单文件输出和归档输出共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
  pub image_name: String,
  pub image_id: Option<u64>,
  pub image_w: u32,
  pub image_h: u32,
  pub num_boxes: usize,
  pub boxes: Vec<[f32; 4]>,
  pub features: Vec<Vec<f32>>,
  pub confidences: Vec<f32>,
  pub labels: Vec<u32>,
}

impl RegionRecord {
  pub fn new(frame: &ImageFrame, kept: KeptSelection) -> Self {
    let source = frame.source();
    RegionRecord {
      image_name: source.file_name(),
      image_id: source.image_id,
      image_w: frame.width(),
      image_h: frame.height(),
      num_boxes: kept.len(),
      boxes: kept.boxes,
      features: kept.features,
      confidences: kept.confidences,
      labels: kept.labels,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
  #[default]
  Json,
  #[cfg(feature = "bincode_record")]
  Bincode,
}

impl FromStr for RecordFormat {
  type Err = OutputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "json" => Ok(RecordFormat::Json),
      #[cfg(feature = "bincode_record")]
      "bincode" | "bin" => Ok(RecordFormat::Bincode),
      other => Err(OutputError::UnknownFormat(other.to_string())),
    }
  }
}

impl RecordFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      RecordFormat::Json => "json",
      #[cfg(feature = "bincode_record")]
      RecordFormat::Bincode => "bin",
    }
  }

  /// 按文件扩展名推断格式
  pub fn from_path(path: &Path) -> Result<Self, OutputError> {
    let ext = path
      .extension()
      .and_then(|ext| ext.to_str())
      .unwrap_or_default();
    ext.parse()
  }

  pub fn encode<T: Serialize, W: Write>(&self, writer: W, value: &T) -> Result<(), OutputError> {
    match self {
      RecordFormat::Json => serde_json::to_writer(writer, value)?,
      #[cfg(feature = "bincode_record")]
      RecordFormat::Bincode => bincode::serialize_into(writer, value)?,
    }
    Ok(())
  }

  pub fn decode<T: DeserializeOwned, R: Read>(&self, reader: R) -> Result<T, OutputError> {
    let value = match self {
      RecordFormat::Json => serde_json::from_reader(reader)?,
      #[cfg(feature = "bincode_record")]
      RecordFormat::Bincode => bincode::deserialize_from(reader)?,
    };
    Ok(value)
  }

  /// 先写入 `<path>.part`，完整写出后再改名为 `path`，
  /// 中途失败时 `path` 不会出现不完整的文件
  pub fn write_file<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), OutputError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    let result = self.write_partial(&partial, value);
    if result.is_err() {
      let _ = std::fs::remove_file(&partial);
      return result;
    }
    std::fs::rename(&partial, path)?;
    Ok(())
  }

  fn write_partial<T: Serialize>(&self, partial: &Path, value: &T) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(File::create(partial)?);
    self.encode(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
  }

  pub fn read_file<T: DeserializeOwned>(&self, path: &Path) -> Result<T, OutputError> {
    self.decode(BufReader::new(File::open(path)?))
  }
}

fn partial_path(path: &Path) -> PathBuf {
  let mut partial = path.as_os_str().to_owned();
  partial.push(".part");
  PathBuf::from(partial)
}

/// 每张图像在输出目录中的文件位置：`<输出目录>/<图像文件名>.<扩展名>`
#[derive(Debug, Clone)]
pub struct OutputLayout {
  pub output_dir: PathBuf,
  pub format: RecordFormat,
}

impl OutputLayout {
  pub fn artifact_path(&self, image: &ImageRef) -> PathBuf {
    self.output_dir.join(format!(
      "{}.{}",
      image.file_name(),
      self.format.extension()
    ))
  }
}

pub trait Persist: Sized {
  type Error;
  fn persist(&mut self, artifact: &Path, record: RegionRecord) -> Result<(), Self::Error>;
  fn finish(self) -> Result<(), Self::Error>;

  /// 任务被中断时调用，默认与 `finish` 相同
  fn abandon(self) -> Result<(), Self::Error> {
    self.finish()
  }
}

pub enum OutputWrapper {
  DirectoryRecord(DirectoryRecordOutput),
  Archive(ArchiveOutput),
}

impl Persist for OutputWrapper {
  type Error = OutputError;

  fn persist(&mut self, artifact: &Path, record: RegionRecord) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::DirectoryRecord(output) => output.persist(artifact, record),
      OutputWrapper::Archive(output) => output.persist(artifact, record),
    }
  }

  fn finish(self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::DirectoryRecord(output) => output.finish(),
      OutputWrapper::Archive(output) => output.finish(),
    }
  }

  fn abandon(self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::DirectoryRecord(output) => output.abandon(),
      OutputWrapper::Archive(output) => output.abandon(),
    }
  }
}
