// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 分割结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{extract::BoundingBox, mask::RectifiedMask};

const PALETTE_SIZE: usize = 80;
const MASK_ALPHA: f32 = 0.5;
const BOX_THICKNESS: u32 = 2;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 未指定字体时依次尝试的系统字体
pub const SYSTEM_FONTS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("Could not read font file {path}: {source}")]
  IoError {
    path: String,
    source: std::io::Error,
  },
  #[error("Invalid font file {0}")]
  FontLoadError(String),
}

pub fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|source| DrawError::IoError {
    path: path.display().to_string(),
    source,
  })?;
  FontArc::try_from_vec(data).map_err(|_| DrawError::FontLoadError(path.display().to_string()))
}

/// 先尝试指定的字体，再尝试系统字体；都不可用时不绘制文字标签
pub fn locate_font(explicit: Option<&Path>) -> Option<FontArc> {
  if let Some(path) = explicit {
    match load_font(path) {
      Ok(font) => {
        info!("使用字体: {}", path.display());
        return Some(font);
      }
      Err(e) => warn!("无法加载指定字体: {}", e),
    }
  }

  for path in SYSTEM_FONTS.iter().map(PathBuf::from) {
    match load_font(&path) {
      Ok(font) => {
        info!("使用系统字体: {}", path.display());
        return Some(font);
      }
      Err(e) => debug!("{}", e),
    }
  }

  warn!("没有可用字体，标注图像不绘制文字标签");
  None
}

/// 标签文本，例如 `person 0.87`
pub fn label_text(class_name: &str, confidence: Option<f64>) -> String {
  match confidence {
    Some(confidence) => format!("{} {:.2}", class_name, confidence),
    None => class_name.to_string(),
  }
}

/// 在原图上叠加实例掩码、边界框和标签
pub struct Draw {
  colors: Vec<Rgb<u8>>,
  mask_alpha: f32,
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个类别一种颜色，色相均匀分布
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      colors,
      mask_alpha: MASK_ALPHA,
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  pub fn color_for(&self, class_id: Option<i64>) -> Rgb<u8> {
    let idx = class_id
      .map(|id| id.rem_euclid(self.colors.len() as i64) as usize)
      .unwrap_or(0);
    self.colors[idx]
  }

  pub fn draw_instance(
    &self,
    image: &mut RgbImage,
    mask: &RectifiedMask,
    bbox: &BoundingBox,
    class_id: Option<i64>,
    label: &str,
  ) {
    let color = self.color_for(class_id);
    let x2 = bbox.x2.min(image.width()).min(mask.width());
    let y2 = bbox.y2.min(image.height()).min(mask.height());

    // 混合掩码区域
    for y in bbox.y1..y2 {
      for x in bbox.x1..x2 {
        if mask.is_foreground(x, y) {
          let pixel = image.get_pixel_mut(x, y);
          for c in 0..3 {
            let blended =
              pixel[c] as f32 * (1.0 - self.mask_alpha) + color[c] as f32 * self.mask_alpha;
            pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
          }
        }
      }
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..BOX_THICKNESS {
      let width = bbox.width().saturating_sub(2 * thickness);
      let height = bbox.height().saturating_sub(2 * thickness);
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at((bbox.x1 + thickness) as i32, (bbox.y1 + thickness) as i32)
        .of_size(width, height);
      draw_hollow_rect_mut(image, rect, color);
    }

    self.draw_label(image, bbox, color, label);
  }

  // 标签画在边框上方，放不下时贴着图像顶部
  fn draw_label(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, label: &str) {
    let Some(font) = self.font.as_ref() else {
      return;
    };
    if label.is_empty() {
      return;
    }

    let (text_width, text_height) = text_size(self.font_scale, font, label);
    let label_height = text_height + 2 * LABEL_PADDING;
    let label_width = (text_width + 2 * LABEL_PADDING).min(image.width().saturating_sub(bbox.x1));
    if label_width == 0 || label_height == 0 {
      return;
    }

    let label_x = bbox.x1 as i32;
    let label_y = (bbox.y1 as i32 - label_height as i32).max(0);
    draw_filled_rect_mut(
      image,
      Rect::at(label_x, label_y).of_size(label_width, label_height),
      color,
    );
    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      label_x + LABEL_PADDING as i32,
      label_y + LABEL_PADDING as i32,
      self.font_scale,
      font,
      label,
    );
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::mask::rectify;
  use ndarray::{ArrayD, IxDyn};

  fn full_mask(size: u32) -> RectifiedMask {
    let raw = ArrayD::from_elem(IxDyn(&[size as usize, size as usize]), 1.0);
    rectify(&raw, size, size).unwrap()
  }

  #[test]
  fn test_overlay_stays_inside_box() {
    let mut image = RgbImage::new(20, 20);
    let mask = full_mask(20);
    let bbox = BoundingBox::clamped([5.0, 5.0, 15.0, 15.0], 20, 20);

    Draw::default().draw_instance(&mut image, &mask, &bbox, Some(3), "person 0.90");

    assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(19, 19), Rgb([0, 0, 0]));
    assert_ne!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
    // 边框使用类别颜色
    assert_eq!(*image.get_pixel(5, 5), Draw::default().color_for(Some(3)));
    // 没有字体时不绘制标签
    assert_eq!(*image.get_pixel(5, 2), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_label_drawn_above_box() {
    let Some(font) = SYSTEM_FONTS
      .iter()
      .find_map(|path| load_font(Path::new(path)).ok())
    else {
      return;
    };
    let mut image = RgbImage::new(120, 80);
    let mask = full_mask(120);
    let bbox = BoundingBox::clamped([10.0, 40.0, 60.0, 70.0], 120, 80);
    let draw = Draw::default().with_font(Some(font));

    draw.draw_instance(&mut image, &mask, &bbox, Some(0), "person 0.90");

    let color = draw.color_for(Some(0));
    let above = (0..40).any(|y| (10..60).any(|x| *image.get_pixel(x, y) == color));
    assert!(above);
  }

  #[test]
  fn test_label_text() {
    assert_eq!(label_text("person", Some(0.876)), "person 0.88");
    assert_eq!(label_text("unknown", None), "unknown");
  }

  #[test]
  fn test_load_font_errors() {
    let missing = load_font(Path::new("does_not_exist/font.ttf"));
    assert!(matches!(missing, Err(DrawError::IoError { .. })));

    let path = std::env::temp_dir().join("shanan_seg_not_a_font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    let invalid = load_font(&path);
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(invalid, Err(DrawError::FontLoadError(_))));
  }

  #[test]
  fn test_palette_wraps() {
    let draw = Draw::default();
    assert_eq!(draw.color_for(Some(1)), draw.color_for(Some(81)));
    assert_eq!(draw.color_for(Some(-1)), draw.color_for(Some(79)));
    assert_eq!(draw.color_for(None), draw.color_for(Some(0)));
  }
}
