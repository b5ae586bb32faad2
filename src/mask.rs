// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mask.rs - 掩码校正
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

//! 把模型输出分辨率下的实例掩码重采样到原图分辨率并二值化。
//!
//! 检测器给出的边界框已经是原图坐标，掩码却停留在模型输入分辨率，
//! 两者必须分别处理。校正后的掩码与原图逐像素对齐，取值只有 0 和 255。

use image::{
  GrayImage, ImageBuffer, Luma,
  imageops::{self, FilterType},
};
use ndarray::{ArrayView2, Axis, Ix2};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::RawMask;

const UNIT_THRESHOLD: f32 = 0.5;
const BYTE_THRESHOLD: f32 = 127.0;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

#[derive(Error, Debug)]
pub enum MaskError {
  #[error("mask cannot be squeezed to 2 dimensions, shape {0:?}")]
  InvalidShape(Vec<usize>),
  #[error("mask has an empty dimension, shape {0:?}")]
  EmptyMask(Vec<usize>),
}

/// 与原图同尺寸的二值掩码
#[derive(Debug, Clone)]
pub struct RectifiedMask {
  mask: GrayImage,
}

impl RectifiedMask {
  pub fn width(&self) -> u32 {
    self.mask.width()
  }

  pub fn height(&self) -> u32 {
    self.mask.height()
  }

  pub fn is_foreground(&self, x: u32, y: u32) -> bool {
    self.mask.get_pixel(x, y)[0] == FOREGROUND
  }

  pub fn as_gray(&self) -> &GrayImage {
    &self.mask
  }
}

/// 原始掩码的取值范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueRange {
  /// [0, 1]，阈值 0.5
  Unit,
  /// [0, 255]，阈值 127
  Byte,
}

impl ValueRange {
  fn of(values: &ArrayView2<f32>) -> Self {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max <= 1.0 {
      ValueRange::Unit
    } else {
      ValueRange::Byte
    }
  }

  fn high(self) -> f32 {
    match self {
      ValueRange::Unit => 1.0,
      ValueRange::Byte => 255.0,
    }
  }

  /// 归一化到 [0, 1] 之后的阈值，严格大于才算前景
  fn threshold(self) -> f32 {
    match self {
      ValueRange::Unit => UNIT_THRESHOLD,
      ValueRange::Byte => BYTE_THRESHOLD / 255.0,
    }
  }
}

/// 将原始掩码校正到 `width`x`height`
pub fn rectify(raw: &RawMask, width: u32, height: u32) -> Result<RectifiedMask, MaskError> {
  let values = squeeze(raw)?;
  let (mask_height, mask_width) = values.dim();
  let range = ValueRange::of(&values);

  // 已经二值化的掩码用最近邻，避免插值引入小数边缘
  let binary = values
    .iter()
    .all(|&v| v == 0.0 || v == range.high());
  let filter = if binary {
    FilterType::Nearest
  } else {
    FilterType::Triangle
  };
  debug!(
    "掩码 {}x{} -> {}x{}, 取值范围 {:?}, 二值: {}",
    mask_width, mask_height, width, height, range, binary
  );

  // 重采样会把浮点像素截断到 [0, 1]，先按取值范围归一化，阈值同样归一化
  let high = range.high();
  let grid: ImageBuffer<Luma<f32>, Vec<f32>> =
    ImageBuffer::from_fn(mask_width as u32, mask_height as u32, |x, y| {
      Luma([(values[[y as usize, x as usize]] / high).clamp(0.0, 1.0)])
    });
  let resized = imageops::resize(&grid, width, height, filter);
  let mut mask = binarize(&resized, range.threshold());

  if mask.dimensions() != (width, height) {
    warn!(
      "掩码尺寸 {:?} 与原图 {}x{} 不一致，使用最近邻再次缩放",
      mask.dimensions(),
      width,
      height
    );
    mask = imageops::resize(&mask, width, height, FilterType::Nearest);
  }

  Ok(RectifiedMask { mask })
}

/// 去掉单一维度直到只剩二维，优先去掉尾部维度
fn squeeze(raw: &RawMask) -> Result<ArrayView2<'_, f32>, MaskError> {
  let shape = raw.shape().to_vec();
  let mut view = raw.view();
  while view.ndim() > 2 {
    let axis = (0..view.ndim())
      .rev()
      .find(|&axis| view.len_of(Axis(axis)) == 1)
      .ok_or_else(|| MaskError::InvalidShape(shape.clone()))?;
    view = view.index_axis_move(Axis(axis), 0);
  }

  let view = view
    .into_dimensionality::<Ix2>()
    .map_err(|_| MaskError::InvalidShape(shape.clone()))?;
  if view.is_empty() {
    return Err(MaskError::EmptyMask(shape));
  }
  Ok(view)
}

fn binarize(values: &ImageBuffer<Luma<f32>, Vec<f32>>, threshold: f32) -> GrayImage {
  ImageBuffer::from_fn(values.width(), values.height(), |x, y| {
    if values.get_pixel(x, y)[0] > threshold {
      Luma([FOREGROUND])
    } else {
      Luma([BACKGROUND])
    }
  })
}

#[cfg(test)]
mod test {
  use super::*;
  use ndarray::{Array2, ArrayD, IxDyn};

  fn uniform(height: usize, width: usize, value: f32) -> RawMask {
    ArrayD::from_elem(IxDyn(&[height, width]), value)
  }

  fn count_foreground(mask: &RectifiedMask) -> usize {
    mask.as_gray().pixels().filter(|p| p[0] == FOREGROUND).count()
  }

  #[test]
  fn test_upsample_shape() {
    let mask = rectify(&uniform(50, 50, 1.0), 100, 100).unwrap();
    assert_eq!((mask.width(), mask.height()), (100, 100));
    assert_eq!(count_foreground(&mask), 100 * 100);
  }

  #[test]
  fn test_downsample_shape() {
    let mask = rectify(&uniform(300, 200, 0.0), 64, 48).unwrap();
    assert_eq!((mask.width(), mask.height()), (64, 48));
    assert_eq!(count_foreground(&mask), 0);
  }

  #[test]
  fn test_non_square_shape() {
    let mask = rectify(&uniform(160, 160, 0.9), 37, 211).unwrap();
    assert_eq!((mask.width(), mask.height()), (37, 211));
    assert_eq!(count_foreground(&mask), 37 * 211);
  }

  #[test]
  fn test_unit_threshold() {
    let fg = rectify(&uniform(8, 8, 0.6), 16, 16).unwrap();
    assert_eq!(count_foreground(&fg), 16 * 16);
    let bg = rectify(&uniform(8, 8, 0.4), 16, 16).unwrap();
    assert_eq!(count_foreground(&bg), 0);
  }

  #[test]
  fn test_byte_threshold() {
    let bg = rectify(&uniform(8, 8, 100.0), 16, 16).unwrap();
    assert_eq!(count_foreground(&bg), 0);
    let fg = rectify(&uniform(8, 8, 200.0), 16, 16).unwrap();
    assert_eq!(count_foreground(&fg), 16 * 16);
  }

  #[test]
  fn test_byte_threshold_uses_raw_values() {
    let fg = rectify(&uniform(4, 4, 127.4), 4, 4).unwrap();
    assert!(fg.is_foreground(0, 0));
    assert_eq!(count_foreground(&fg), 16);
    let bg = rectify(&uniform(4, 4, 126.6), 4, 4).unwrap();
    assert_eq!(count_foreground(&bg), 0);
    let edge = rectify(&uniform(4, 4, 127.0), 4, 4).unwrap();
    assert_eq!(count_foreground(&edge), 0);
  }

  #[test]
  fn test_binary_mask_keeps_hard_edges() {
    // 左半边前景
    let raw = Array2::from_shape_fn((4, 4), |(_, x)| if x < 2 { 255.0 } else { 0.0 }).into_dyn();
    let mask = rectify(&raw, 8, 8).unwrap();
    for y in 0..8 {
      for x in 0..8 {
        assert_eq!(mask.is_foreground(x, y), x < 4, "({}, {})", x, y);
      }
    }
  }

  #[test]
  fn test_trailing_singleton_squeezed() {
    let raw = ArrayD::from_elem(IxDyn(&[10, 20, 1]), 1.0);
    let mask = rectify(&raw, 40, 20).unwrap();
    assert_eq!((mask.width(), mask.height()), (40, 20));
    assert_eq!(count_foreground(&mask), 40 * 20);
  }

  #[test]
  fn test_leading_singleton_squeezed() {
    let raw = ArrayD::from_elem(IxDyn(&[1, 10, 20]), 0.0);
    assert!(rectify(&raw, 20, 10).is_ok());
  }

  #[test]
  fn test_invalid_shapes() {
    let raw = ArrayD::from_elem(IxDyn(&[2, 3, 4]), 1.0);
    assert!(matches!(rectify(&raw, 4, 4), Err(MaskError::InvalidShape(_))));
    let raw = ArrayD::from_elem(IxDyn(&[5]), 1.0);
    assert!(matches!(rectify(&raw, 4, 4), Err(MaskError::InvalidShape(_))));
    let raw = ArrayD::from_elem(IxDyn(&[0, 5]), 1.0);
    assert!(matches!(rectify(&raw, 4, 4), Err(MaskError::EmptyMask(_))));
  }

  #[test]
  fn test_same_size_passthrough() {
    let raw = Array2::from_shape_fn((3, 3), |(y, x)| if x == y { 0.8 } else { 0.1 }).into_dyn();
    let mask = rectify(&raw, 3, 3).unwrap();
    assert!(mask.is_foreground(1, 1));
    assert!(!mask.is_foreground(0, 1));
  }
}
