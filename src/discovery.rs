// 该文件是 Quyu （区域特征） 项目的一部分。
// src/discovery.rs - 图像文件发现
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

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DiscoveryError {
  #[error("目录遍历错误: {0}")]
  WalkError(#[from] walkdir::Error),
  #[error("输入路径不存在: {0}")]
  NotFound(PathBuf),
}

/// 语料中的一张图像，发现之后不再改变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
  pub path: PathBuf,
  pub image_id: Option<u64>,
}

impl ImageRef {
  pub fn new(path: PathBuf, with_id: bool) -> Self {
    let image_id = if with_id {
      path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_image_id)
    } else {
      None
    };
    ImageRef { path, image_id }
  }

  /// 文件名，用作输出文件名和归档键
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
  }
}

/// 从文件名中解析数字 ID，例如 `COCO_val2014_000000000042.jpg` -> 42
pub fn parse_image_id(file_name: &str) -> Option<u64> {
  let stem = file_name.split('.').next()?;
  let tail = stem.rsplit('_').next()?;
  tail.parse().ok()
}

/// 递归列出 `root` 下所有以 `ext` 结尾的文件。
///
/// 每一层目录项都按文件名字节序排序后再递归，保证所有 worker
/// 在不通信的情况下得到同一个全局顺序。`root` 本身是文件时，
/// 只要后缀匹配就作为唯一的一张图像返回。
pub fn discover_images(
  root: &Path,
  ext: &str,
  with_id: bool,
) -> Result<Vec<ImageRef>, DiscoveryError> {
  if !root.exists() {
    return Err(DiscoveryError::NotFound(root.to_path_buf()));
  }

  info!("扫描图像目录: {}", root.display());
  let mut images = Vec::new();
  for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
    let entry = entry?;
    if !entry.file_type().is_file() {
      continue;
    }
    if entry
      .file_name()
      .as_encoded_bytes()
      .ends_with(ext.as_bytes())
    {
      debug!("发现图像: {}", entry.path().display());
      images.push(ImageRef::new(entry.into_path(), with_id));
    }
  }

  info!("共发现 {} 张图像", images.len());
  Ok(images)
}
