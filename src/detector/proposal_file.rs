// 该文件是 Quyu （区域特征） 项目的一部分。
// src/detector/proposal_file.rs - 预计算候选文件检测器
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

use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{Detector, DetectorError, RawProposalSet},
  frame::ImageFrame,
  url_path,
};

/// 从 `<目录>/<图像文件名>.json` 读取检测器离线导出的候选区域
pub struct ProposalFileDetector {
  directory: PathBuf,
}

impl FromUrlWithScheme for ProposalFileDetector {
  const SCHEME: &'static str = "proposals";
}

impl FromUrl for ProposalFileDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }

    let directory = url_path(url);
    if !directory.is_dir() {
      return Err(DetectorError::SidecarMissing(directory));
    }
    info!("候选文件目录: {}", directory.display());
    Ok(ProposalFileDetector { directory })
  }
}

impl ProposalFileDetector {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    ProposalFileDetector {
      directory: directory.into(),
    }
  }

  fn sidecar_path(&self, frame: &ImageFrame) -> PathBuf {
    self
      .directory
      .join(format!("{}.json", frame.source().file_name()))
  }

  fn load(&self, frame: &ImageFrame) -> Result<RawProposalSet, DetectorError> {
    let path = self.sidecar_path(frame);
    if !path.is_file() {
      return Err(DetectorError::SidecarMissing(path));
    }
    debug!("读取候选文件: {}", path.display());
    let data = std::fs::read(&path)?;
    let proposals: RawProposalSet = serde_json::from_slice(&data)?;
    proposals.validate()?;
    debug!(
      "候选数量: {}, 类别数: {}",
      proposals.len(),
      proposals.num_classes()
    );
    Ok(proposals)
  }
}

impl Detector for ProposalFileDetector {
  type Error = DetectorError;

  fn detect(&self, frame: &ImageFrame) -> Result<RawProposalSet, Self::Error> {
    self.load(frame)
  }

  fn detect_with_boxes(
    &self,
    frame: &ImageFrame,
    boxes: &[[f32; 4]],
  ) -> Result<RawProposalSet, Self::Error> {
    self.load(frame)?.with_boxes(boxes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::discovery::ImageRef;
  use image::RgbImage;
  use tempfile::TempDir;

  fn frame(name: &str) -> ImageFrame {
    ImageFrame::from_pixels(
      ImageRef::new(PathBuf::from("/corpus").join(name), false),
      RgbImage::new(2, 2),
    )
    .unwrap()
  }

  #[test]
  fn reads_sidecar_by_file_name() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
      dir.path().join("a.jpg.json"),
      r#"{"boxes":[[0,0,4,4],[1,1,5,5]],"class_scores":[[0.1,0.9],[0.8,0.2]],"features":[[1,2],[3,4]]}"#,
    )
    .unwrap();

    let url = Url::from_directory_path(dir.path()).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "proposals", 1)).unwrap();
    let detector = ProposalFileDetector::from_url(&url).unwrap();

    let proposals = detector.detect(&frame("a.jpg")).unwrap();
    assert_eq!(proposals.len(), 2);
    assert_eq!(proposals.num_classes(), 2);
    assert_eq!(proposals.features[1], vec![3.0, 4.0]);

    let boxed = detector
      .detect_with_boxes(&frame("a.jpg"), &[[9.0; 4], [8.0; 4]])
      .unwrap();
    assert_eq!(boxed.boxes[0], [9.0; 4]);
  }

  #[test]
  fn missing_sidecar_is_a_detector_failure() {
    let dir = TempDir::new().unwrap();
    let detector = ProposalFileDetector::new(dir.path());
    assert!(matches!(
      detector.detect(&frame("b.jpg")),
      Err(DetectorError::SidecarMissing(_))
    ));
  }
}
