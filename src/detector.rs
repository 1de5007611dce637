// 该文件是 Quyu （区域特征） 项目的一部分。
// src/detector.rs - 检测器适配
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ImageFrame};

mod box_file;
mod proposal_file;

pub use self::box_file::{BoxFile, BoxFileError};
pub use self::proposal_file::ProposalFileDetector;

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("候选文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("候选文件不存在: {0}")]
  SidecarMissing(PathBuf),
  #[error("候选数据形状错误: {0}")]
  ShapeError(String),
  #[error("外部候选框数量不匹配: 期望 {expected}, 实际 {actual}")]
  BoxCountMismatch { expected: usize, actual: usize },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 检测器对一张图像给出的原始候选区域。
///
/// `boxes` 为 `[x_min, y_min, x_max, y_max]` 像素坐标；
/// `class_scores` 每行 C 个类别分数，第 0 类为背景；
/// `features` 每行是不透明的特征向量，原样透传。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProposalSet {
  pub boxes: Vec<[f32; 4]>,
  pub class_scores: Vec<Vec<f32>>,
  pub features: Vec<Vec<f32>>,
}

impl RawProposalSet {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  /// 类别数 C（含背景）
  pub fn num_classes(&self) -> usize {
    self.class_scores.first().map(Vec::len).unwrap_or(0)
  }

  pub fn validate(&self) -> Result<(), DetectorError> {
    let n = self.boxes.len();
    if self.class_scores.len() != n || self.features.len() != n {
      return Err(DetectorError::ShapeError(format!(
        "候选数量不一致: boxes={}, class_scores={}, features={}",
        n,
        self.class_scores.len(),
        self.features.len()
      )));
    }
    if n == 0 {
      return Ok(());
    }

    let c = self.num_classes();
    if c < 2 {
      return Err(DetectorError::ShapeError(format!(
        "类别数至少为 2（含背景），实际为 {}",
        c
      )));
    }
    if let Some(row) = self.class_scores.iter().position(|row| row.len() != c) {
      return Err(DetectorError::ShapeError(format!(
        "第 {} 行类别分数长度为 {}, 期望 {}",
        row,
        self.class_scores[row].len(),
        c
      )));
    }

    let d = self.features[0].len();
    if let Some(row) = self.features.iter().position(|row| row.len() != d) {
      return Err(DetectorError::ShapeError(format!(
        "第 {} 行特征长度为 {}, 期望 {}",
        row,
        self.features[row].len(),
        d
      )));
    }
    Ok(())
  }

  /// 用外部给定的候选框替换检测器自己的候选框
  pub fn with_boxes(mut self, boxes: &[[f32; 4]]) -> Result<Self, DetectorError> {
    if boxes.len() != self.boxes.len() {
      return Err(DetectorError::BoxCountMismatch {
        expected: self.boxes.len(),
        actual: boxes.len(),
      });
    }
    self.boxes = boxes.to_vec();
    Ok(self)
  }
}

/// 检测器契约：一张图像进，原始候选区域出。
/// 检测器句柄显式传入任务，不依赖任何全局状态。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, frame: &ImageFrame) -> Result<RawProposalSet, Self::Error>;

  /// 跳过检测器内部的候选框生成，使用外部给定的候选框
  fn detect_with_boxes(
    &self,
    frame: &ImageFrame,
    boxes: &[[f32; 4]],
  ) -> Result<RawProposalSet, Self::Error>;
}

pub enum DetectorWrapper {
  ProposalFile(ProposalFileDetector),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ProposalFileDetector::SCHEME => Ok(DetectorWrapper::ProposalFile(
        ProposalFileDetector::from_url(url)?,
      )),
      other => Err(DetectorError::SchemeMismatch(format!(
        "不支持的检测器方案 '{}'",
        other
      ))),
    }
  }
}

impl Detector for DetectorWrapper {
  type Error = DetectorError;

  fn detect(&self, frame: &ImageFrame) -> Result<RawProposalSet, Self::Error> {
    match self {
      DetectorWrapper::ProposalFile(detector) => detector.detect(frame),
    }
  }

  fn detect_with_boxes(
    &self,
    frame: &ImageFrame,
    boxes: &[[f32; 4]],
  ) -> Result<RawProposalSet, Self::Error> {
    match self {
      DetectorWrapper::ProposalFile(detector) => detector.detect_with_boxes(frame, boxes),
    }
  }
}
