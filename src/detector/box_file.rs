// 该文件是 Quyu （区域特征） 项目的一部分。
// src/detector/box_file.rs - bottom-up 候选框文件
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

use std::collections::HashMap;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;
use tracing::info;

// image_id, image_w, image_h, num_boxes, boxes, features
const FIELD_COUNT: usize = 6;
const BOX_BYTES: usize = 4 * std::mem::size_of::<f32>();

#[derive(Error, Debug)]
pub enum BoxFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行格式错误: {reason}")]
  Malformed { line: usize, reason: String },
}

/// bottom-up attention 导出的 TSV 文件，按图像 ID 给出外部候选框
#[derive(Debug, Default)]
pub struct BoxFile {
  boxes: HashMap<u64, Vec<[f32; 4]>>,
}

impl BoxFile {
  pub fn load(path: &Path) -> Result<Self, BoxFileError> {
    info!("加载候选框文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let file = Self::parse(&text)?;
    info!("候选框文件包含 {} 张图像", file.len());
    Ok(file)
  }

  pub fn parse(text: &str) -> Result<Self, BoxFileError> {
    let mut boxes = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
      if line.trim().is_empty() {
        continue;
      }
      let line_no = idx + 1;
      let malformed = |reason: String| BoxFileError::Malformed {
        line: line_no,
        reason,
      };

      let fields: Vec<&str> = line.split('\t').collect();
      if fields.len() < FIELD_COUNT {
        return Err(malformed(format!(
          "字段数 {}, 期望 {}",
          fields.len(),
          FIELD_COUNT
        )));
      }
      let image_id: u64 = fields[0]
        .trim()
        .parse()
        .map_err(|_| malformed(format!("无效的 image_id '{}'", fields[0])))?;
      let num_boxes: usize = fields[3]
        .trim()
        .parse()
        .map_err(|_| malformed(format!("无效的 num_boxes '{}'", fields[3])))?;
      let raw = STANDARD
        .decode(fields[4].trim())
        .map_err(|e| malformed(format!("boxes 解码失败: {}", e)))?;
      let expected = num_boxes
        .checked_mul(BOX_BYTES)
        .ok_or_else(|| malformed(format!("num_boxes {} 过大", num_boxes)))?;
      if raw.len() != expected {
        return Err(malformed(format!(
          "boxes 字节数 {} 与 num_boxes {} 不符",
          raw.len(),
          num_boxes
        )));
      }

      let rows = raw
        .chunks_exact(BOX_BYTES)
        .map(|chunk| {
          let mut row = [0f32; 4];
          for (value, bytes) in row.iter_mut().zip(chunk.chunks_exact(4)) {
            *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
          }
          row
        })
        .collect();
      boxes.insert(image_id, rows);
    }
    Ok(BoxFile { boxes })
  }

  pub fn get(&self, image_id: u64) -> Option<&[[f32; 4]]> {
    self.boxes.get(&image_id).map(Vec::as_slice)
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}
