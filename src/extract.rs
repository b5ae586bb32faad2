// 该文件是 Shanan （山南西风） 项目的一部分。
// src/extract.rs - 实例提取
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

use image::{ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  input::InputImage,
  mask::{MaskError, RectifiedMask, rectify},
  model::DetectResult,
  output::{Draw, label_text},
};

const UNKNOWN_CLASS: &str = "unknown";

#[derive(Error, Debug)]
pub enum ExtractError {
  #[error("Could not create segment directory {path}: {source}")]
  CreateDirError {
    path: String,
    source: std::io::Error,
  },
  #[error("Could not write segment {path}: {source}")]
  SaveSegmentError {
    path: String,
    source: image::ImageError,
  },
  #[error("Invalid mask: {0}")]
  MaskError(#[from] MaskError),
}

/// 裁剪到原图范围内的整数边界框，右下角为开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl BoundingBox {
  /// 左上角向下取整、右下角向上取整后裁剪到 `width`x`height`。
  /// 右下角至少比左上角大 1。
  pub fn clamped(bbox: [f32; 4], width: u32, height: u32) -> Self {
    let (w, h) = (i64::from(width), i64::from(height));
    let x1 = (bbox[0].floor() as i64).clamp(0, (w - 1).max(0));
    let y1 = (bbox[1].floor() as i64).clamp(0, (h - 1).max(0));
    let x2 = (bbox[2].ceil() as i64).min(w).max(x1 + 1);
    let y2 = (bbox[3].ceil() as i64).min(h).max(y1 + 1);

    Self {
      x1: x1 as u32,
      y1: y1 as u32,
      x2: x2 as u32,
      y2: y2 as u32,
    }
  }

  pub fn is_degenerate(&self) -> bool {
    self.x2 <= self.x1 || self.y2 <= self.y1
  }

  pub fn width(&self) -> u32 {
    self.x2.saturating_sub(self.x1)
  }

  pub fn height(&self) -> u32 {
    self.y2.saturating_sub(self.y1)
  }

  pub fn to_array(self) -> [u32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

/// 单个实例的元数据记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceRecord {
  pub relative_path: String,
  pub bbox: [u32; 4],
  pub class_id: Option<i64>,
  pub class_name: String,
  pub confidence: Option<f64>,
}

/// 实例图像的存放位置：输出图像旁的 `<stem>_segments/<stem>_segment_<n>.png`
#[derive(Debug, Clone)]
pub struct SegmentLayout {
  directory: PathBuf,
  stem: String,
}

impl SegmentLayout {
  pub fn for_output(output_path: &Path) -> Self {
    let parent = output_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = output_path
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| "output".to_string());

    Self {
      directory: parent.join(format!("{}_segments", stem)),
      stem,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn file_name(&self, index: usize) -> String {
    format!("{}_segment_{}.png", self.stem, index + 1)
  }

  pub fn path(&self, index: usize) -> PathBuf {
    self.directory.join(self.file_name(index))
  }

  /// 相对输出目录的 posix 风格路径
  pub fn relative_path(&self, index: usize) -> String {
    format!("{}_segments/{}", self.stem, self.file_name(index))
  }
}

/// 用掩码保留前景像素（其余置黑）并裁剪到边界框。
/// 边界框退化或越界时返回 `None`。
pub fn crop_instance(
  image: &RgbImage,
  mask: &RectifiedMask,
  bbox: &BoundingBox,
) -> Option<RgbImage> {
  if bbox.is_degenerate()
    || bbox.x2 > image.width()
    || bbox.y2 > image.height()
    || mask.width() != image.width()
    || mask.height() != image.height()
  {
    return None;
  }

  let crop = RgbImage::from_fn(bbox.width(), bbox.height(), |x, y| {
    let (sx, sy) = (bbox.x1 + x, bbox.y1 + y);
    if mask.is_foreground(sx, sy) {
      *image.get_pixel(sx, sy)
    } else {
      Rgb([0, 0, 0])
    }
  });

  if crop.is_empty() { None } else { Some(crop) }
}

/// 一个保留下来的实例：元数据记录和尚未写盘的裁剪图像
#[derive(Debug, Clone)]
pub struct Segment {
  pub record: InstanceRecord,
  path: PathBuf,
  crop: RgbImage,
}

impl Segment {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn crop(&self) -> &RgbImage {
    &self.crop
  }
}

pub struct InstanceExtractor {
  layout: SegmentLayout,
  draw: Draw,
}

impl InstanceExtractor {
  pub fn new(output_path: &Path) -> Self {
    Self {
      layout: SegmentLayout::for_output(output_path),
      draw: Draw::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn layout(&self) -> &SegmentLayout {
    &self.layout
  }

  /// 逐个实例校正掩码并裁剪，同时把保留的实例叠加到 `canvas` 上。
  /// 边界处退化的检测被跳过，不算错误。这里不写盘。
  pub fn extract(
    &self,
    image: &InputImage,
    detections: &DetectResult,
    canvas: &mut RgbImage,
  ) -> Result<Vec<Segment>, ExtractError> {
    let (Some(masks), Some(boxes)) = (detections.masks.as_ref(), detections.boxes.as_ref()) else {
      info!("没有检测到实例");
      return Ok(Vec::new());
    };

    let (width, height) = (image.width(), image.height());
    let mut segments = Vec::with_capacity(masks.len());

    for (idx, raw_mask) in masks.iter().enumerate() {
      let Some(raw_box) = boxes.get(idx) else {
        warn!("实例 {} 缺少边界框，跳过", idx);
        continue;
      };

      let bbox = BoundingBox::clamped(*raw_box, width, height);
      if bbox.is_degenerate() {
        debug!("实例 {} 边界框退化 {:?}，跳过", idx, bbox);
        continue;
      }

      let mask = rectify(raw_mask, width, height)?;
      let Some(crop) = crop_instance(image.as_rgb(), &mask, &bbox) else {
        debug!("实例 {} 裁剪结果为空，跳过", idx);
        continue;
      };

      let class_id = detections.class_ids.get(idx).copied();
      let class_name = class_id
        .map(|id| detections.labels.name(id))
        .unwrap_or_else(|| UNKNOWN_CLASS.to_string());
      let confidence = detections.confidences.get(idx).copied().map(f64::from);

      debug!("实例 {}: {} {:?} {:?}", idx, class_name, confidence, bbox);

      self.draw.draw_instance(
        canvas,
        &mask,
        &bbox,
        class_id,
        &label_text(&class_name, confidence),
      );

      segments.push(Segment {
        record: InstanceRecord {
          relative_path: self.layout.relative_path(idx),
          bbox: bbox.to_array(),
          class_id,
          class_name,
          confidence,
        },
        path: self.layout.path(idx),
        crop,
      });
    }

    info!("保留 {} / {} 个实例", segments.len(), masks.len());
    Ok(segments)
  }

  /// 把裁剪图像写到分割结果目录，目录只在有实例时创建
  pub fn save_segments(&self, segments: Vec<Segment>) -> Result<Vec<InstanceRecord>, ExtractError> {
    if segments.is_empty() {
      return Ok(Vec::new());
    }

    std::fs::create_dir_all(self.layout.directory()).map_err(|source| {
      ExtractError::CreateDirError {
        path: self.layout.directory().display().to_string(),
        source,
      }
    })?;

    let mut records = Vec::with_capacity(segments.len());
    for segment in segments {
      segment
        .crop
        .save_with_format(&segment.path, ImageFormat::Png)
        .map_err(|source| ExtractError::SaveSegmentError {
          path: segment.path.display().to_string(),
          source,
        })?;
      debug!("保存实例图像: {}", segment.path.display());
      records.push(segment.record);
    }

    Ok(records)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::LabelMap;
  use ndarray::{ArrayD, IxDyn};

  #[test]
  fn test_clamp_inside() {
    let bbox = BoundingBox::clamped([10.2, 10.7, 59.1, 59.9], 100, 100);
    assert_eq!(bbox.to_array(), [10, 10, 60, 60]);
  }

  #[test]
  fn test_clamp_outside_bounds() {
    let bbox = BoundingBox::clamped([-20.0, -5.5, 140.0, 300.0], 100, 80);
    assert_eq!(bbox.to_array(), [0, 0, 100, 80]);
    assert!(!bbox.is_degenerate());
  }

  #[test]
  fn test_clamp_past_right_edge_keeps_one_pixel() {
    let bbox = BoundingBox::clamped([150.0, 150.0, 160.0, 160.0], 100, 100);
    assert_eq!(bbox.to_array(), [99, 99, 100, 100]);
  }

  #[test]
  fn test_clamp_inverted_box() {
    let bbox = BoundingBox::clamped([50.0, 40.0, 20.0, 10.0], 100, 100);
    assert_eq!(bbox.to_array(), [50, 40, 51, 41]);
    assert!(!bbox.is_degenerate());
  }

  #[test]
  fn test_degenerate_box_yields_no_crop() {
    let image = RgbImage::new(10, 10);
    let mask = rectify(&ArrayD::from_elem(IxDyn(&[10, 10]), 1.0), 10, 10).unwrap();
    let bbox = BoundingBox {
      x1: 4,
      y1: 2,
      x2: 4,
      y2: 8,
    };
    assert!(bbox.is_degenerate());
    assert!(crop_instance(&image, &mask, &bbox).is_none());
  }

  #[test]
  fn test_crop_applies_mask() {
    let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
    // 仅左上角 2x2 为前景
    let raw = ndarray::Array2::from_shape_fn((4, 4), |(y, x)| {
      if x < 2 && y < 2 { 1.0 } else { 0.0 }
    })
    .into_dyn();
    let mask = rectify(&raw, 4, 4).unwrap();
    let bbox = BoundingBox::clamped([1.0, 1.0, 3.0, 3.0], 4, 4);
    let crop = crop_instance(&image, &mask, &bbox).unwrap();
    assert_eq!(crop.dimensions(), (2, 2));
    assert_eq!(*crop.get_pixel(0, 0), Rgb([10, 20, 30]));
    assert_eq!(*crop.get_pixel(1, 0), Rgb([0, 0, 0]));
    assert_eq!(*crop.get_pixel(1, 1), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_segment_layout() {
    let layout = SegmentLayout::for_output(Path::new("results/run/out.jpg"));
    assert_eq!(layout.directory(), Path::new("results/run/out_segments"));
    assert_eq!(
      layout.path(0),
      Path::new("results/run/out_segments/out_segment_1.png")
    );
    assert_eq!(layout.relative_path(2), "out_segments/out_segment_3.png");
  }

  #[test]
  fn test_missing_parallel_entries() {
    let directory = std::env::temp_dir().join("shanan_seg_extract_missing_entries");
    let _ = std::fs::remove_dir_all(&directory);
    let output = directory.join("out.png");

    let image = InputImage::new(RgbImage::from_pixel(20, 20, Rgb([200, 100, 50]))).unwrap();
    let detections = DetectResult {
      masks: Some(vec![
        ArrayD::from_elem(IxDyn(&[10, 10]), 1.0),
        ArrayD::from_elem(IxDyn(&[10, 10]), 1.0),
      ]),
      boxes: Some(vec![[0.0, 0.0, 10.0, 10.0]]),
      class_ids: vec![],
      confidences: vec![],
      labels: LabelMap::Id,
    };

    let extractor = InstanceExtractor::new(&output);
    let mut canvas = image.as_rgb().clone();
    let segments = extractor.extract(&image, &detections, &mut canvas).unwrap();
    assert!(!extractor.layout().directory().exists());
    let records = extractor.save_segments(segments).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].class_id, None);
    assert_eq!(records[0].confidence, None);
    assert_eq!(records[0].class_name, UNKNOWN_CLASS);
    assert!(extractor.layout().path(0).exists());
    assert!(!extractor.layout().path(1).exists());

    std::fs::remove_dir_all(&directory).unwrap();
  }

  #[test]
  fn test_all_skipped_creates_no_directory() {
    let directory = std::env::temp_dir().join("shanan_seg_extract_all_skipped");
    let _ = std::fs::remove_dir_all(&directory);

    let image = InputImage::new(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))).unwrap();
    let detections = DetectResult {
      masks: Some(vec![ArrayD::from_elem(IxDyn(&[8, 8]), 1.0)]),
      boxes: Some(vec![]),
      class_ids: vec![0],
      confidences: vec![0.9],
      labels: LabelMap::Id,
    };

    let extractor = InstanceExtractor::new(&directory.join("out.png"));
    let mut canvas = image.as_rgb().clone();
    let segments = extractor.extract(&image, &detections, &mut canvas).unwrap();
    assert!(segments.is_empty());
    assert!(extractor.save_segments(segments).unwrap().is_empty());
    assert!(!directory.join("out_segments").exists());
    assert_eq!(&canvas, image.as_rgb());
  }
}
