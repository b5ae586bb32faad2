// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};

use crate::FromPath;

#[derive(Error, Debug)]
pub enum ImageReadError {
  #[error("Could not read image from {path}: {source}")]
  IoError {
    path: String,
    source: std::io::Error,
  },
  #[error("Could not decode image from {path}: {source}")]
  DecodeError {
    path: String,
    source: image::ImageError,
  },
  #[error("Invalid image dimensions: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
}

/// 已解码的原始图像，宽高均大于零
#[derive(Debug, Clone)]
pub struct InputImage {
  image: RgbImage,
}

impl InputImage {
  /// 包装一幅 RGB 图像；任一维度为零时返回错误，
  /// 下游的缩放比例计算会以图像尺寸作除数。
  pub fn new(image: RgbImage) -> Result<Self, ImageReadError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      error!("图像尺寸无效: {}x{}", width, height);
      return Err(ImageReadError::InvalidDimensions { width, height });
    }
    Ok(Self { image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_rgb(&self) -> &RgbImage {
    &self.image
  }
}

impl FromPath for InputImage {
  type Error = ImageReadError;

  fn from_path(path: &Path) -> Result<Self, Self::Error> {
    let path_str = path.display().to_string();
    let image = ImageReader::open(path)
      .and_then(|reader| reader.with_guessed_format())
      .map_err(|source| ImageReadError::IoError {
        path: path_str.clone(),
        source,
      })?
      .decode()
      .map_err(|source| ImageReadError::DecodeError {
        path: path_str.clone(),
        source,
      })?;

    debug!(
      "读取图像 {}: {}x{}, {:?}",
      path_str,
      image.width(),
      image.height(),
      image.color()
    );

    InputImage::new(image.into_rgb8())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_zero_height_rejected() {
    let result = InputImage::new(RgbImage::new(10, 0));
    assert!(matches!(
      result,
      Err(ImageReadError::InvalidDimensions {
        width: 10,
        height: 0
      })
    ));
  }

  #[test]
  fn test_zero_width_rejected() {
    assert!(InputImage::new(RgbImage::new(0, 7)).is_err());
  }

  #[test]
  fn test_valid_dimensions() {
    let image = InputImage::new(RgbImage::new(3, 2)).unwrap();
    assert_eq!(image.width(), 3);
    assert_eq!(image.height(), 2);
  }

  #[test]
  fn test_missing_file() {
    let result = InputImage::from_path(Path::new("does_not_exist/image.png"));
    assert!(matches!(result, Err(ImageReadError::IoError { .. })));
  }

  #[test]
  fn test_corrupt_file() {
    let path = std::env::temp_dir().join("shanan_seg_corrupt_input.png");
    std::fs::write(&path, b"definitely not a png").unwrap();
    let result = InputImage::from_path(&path);
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(result, Err(ImageReadError::DecodeError { .. })));
  }

  #[test]
  fn test_read_png_file() {
    let path = std::env::temp_dir().join("shanan_seg_valid_input.png");
    image::GrayImage::from_pixel(6, 4, image::Luma([90])).save(&path).unwrap();
    let result = InputImage::from_path(&path);
    std::fs::remove_file(&path).unwrap();

    let image = result.unwrap();
    assert_eq!((image.width(), image.height()), (6, 4));
    assert_eq!(image.as_rgb().get_pixel(0, 0).0, [90, 90, 90]);
  }
}
