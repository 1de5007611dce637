// 该文件是 Quyu （区域特征） 项目的一部分。
// src/frame.rs - 图像帧定义
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

use image::{ImageReader, RgbImage};
use thiserror::Error;

use crate::discovery::ImageRef;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Empty image: {0}")]
  EmptyImage(String),
}

/// 解码后的一张图像
#[derive(Debug, Clone)]
pub struct ImageFrame {
  source: ImageRef,
  pixels: RgbImage,
}

impl ImageFrame {
  pub fn load(source: &ImageRef) -> Result<Self, FrameError> {
    let pixels = ImageReader::open(&source.path)?
      .with_guessed_format()?
      .decode()?
      .into_rgb8();
    Self::from_pixels(source.clone(), pixels)
  }

  pub fn from_pixels(source: ImageRef, pixels: RgbImage) -> Result<Self, FrameError> {
    if pixels.width() == 0 || pixels.height() == 0 {
      return Err(FrameError::EmptyImage(source.path.display().to_string()));
    }
    Ok(ImageFrame { source, pixels })
  }

  pub fn source(&self) -> &ImageRef {
    &self.source
  }

  pub fn pixels(&self) -> &RgbImage {
    &self.pixels
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }
}
