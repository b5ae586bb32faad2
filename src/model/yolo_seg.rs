// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo_seg.rs - YOLO 实例分割模型（ONNX Runtime）
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

use image::{ImageReader, RgbImage, imageops::FilterType};
use ndarray::{Array1, Array2, Array4, ArrayView2};
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  FromPath,
  model::{DetectResult, InputSize, LabelMap, Model},
};

const YOLO_SEG_NUM_OUTPUTS: usize = 2;
const YOLO_SEG_STRIDE: u32 = 32;
const YOLO_SEG_IMGSZ_KEY: &str = "imgsz";
const YOLO_SEG_NAMES_KEY: &str = "names";

pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.7;
pub const DEFAULT_MAX_DET: usize = 300;

#[derive(Error, Debug)]
pub enum YoloSegError {
  #[error("Model file not found: {0}")]
  ModelNotFound(String),
  #[error("ONNX Runtime error: {0}")]
  OrtError(#[from] ort::Error),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image error: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("Unexpected model output: {0}")]
  InvalidOutput(String),
}

pub struct YoloSegBuilder {
  model_path: PathBuf,
  params: DecodeParams,
}

impl FromPath for YoloSegBuilder {
  type Error = YoloSegError;

  fn from_path(path: &Path) -> Result<Self, Self::Error> {
    if !path.is_file() {
      return Err(YoloSegError::ModelNotFound(path.display().to_string()));
    }

    Ok(YoloSegBuilder {
      model_path: path.to_path_buf(),
      params: DecodeParams::default(),
    })
  }
}

impl YoloSegBuilder {
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.params.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.params.iou = iou;
    self
  }

  pub fn max_det(mut self, max_det: usize) -> Self {
    self.params.max_det = max_det;
    self
  }

  pub fn build(self) -> Result<YoloSeg, YoloSegError> {
    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()?.commit_from_file(&self.model_path)?;
    info!("模型加载完成");

    let (labels, native_size) = {
      let metadata = session.metadata()?;
      let labels = match metadata.custom(YOLO_SEG_NAMES_KEY)? {
        Some(names) => LabelMap::from_literal(&names),
        None => {
          warn!("模型元数据中没有类别表，使用类别 ID 作为名称");
          LabelMap::Id
        }
      };
      let native_size = metadata
        .custom(YOLO_SEG_IMGSZ_KEY)?
        .and_then(|imgsz| parse_imgsz(&imgsz));
      (labels, native_size)
    };

    if session.outputs.len() != YOLO_SEG_NUM_OUTPUTS {
      return Err(YoloSegError::InvalidOutput(format!(
        "expected {} outputs, found {}",
        YOLO_SEG_NUM_OUTPUTS,
        session.outputs.len()
      )));
    }

    debug!("模型原生输入尺寸 (高, 宽): {:?}", native_size);
    debug!("类别表: {:?}", labels);

    Ok(YoloSeg {
      session,
      labels,
      native_size,
      params: self.params,
    })
  }
}

pub struct YoloSeg {
  session: Session,
  labels: LabelMap,
  native_size: Option<(u32, u32)>,
  params: DecodeParams,
}

impl YoloSeg {
  fn input_size(&self, size: InputSize, image: &RgbImage) -> (u32, u32) {
    match size {
      InputSize::Fixed(side) => (side, side),
      InputSize::Native => self.native_size.unwrap_or_else(|| {
        let (width, height) = image.dimensions();
        (round_to_stride(height), round_to_stride(width))
      }),
    }
  }
}

impl Model for YoloSeg {
  type Error = YoloSegError;

  fn infer(&mut self, image_path: &Path, size: InputSize) -> Result<DetectResult, Self::Error> {
    let image = ImageReader::open(image_path)?
      .with_guessed_format()?
      .decode()?
      .into_rgb8();
    let (input_height, input_width) = self.input_size(size, &image);
    debug!(
      "预处理: {}x{} -> {}x{}",
      image.width(),
      image.height(),
      input_width,
      input_height
    );

    let input = Tensor::from_array(preprocess(&image, input_width, input_height))?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![input])?;
    if outputs.len() < YOLO_SEG_NUM_OUTPUTS {
      return Err(YoloSegError::InvalidOutput(format!(
        "expected {} outputs, found {}",
        YOLO_SEG_NUM_OUTPUTS,
        outputs.len()
      )));
    }

    let (pred_shape, pred) = outputs[0].try_extract_tensor::<f32>()?;
    let (proto_shape, protos) = outputs[1].try_extract_tensor::<f32>()?;
    debug!("输出形状: {:?}, {:?}", &pred_shape[..], &proto_shape[..]);

    let mut result = self.params.decode(
      Prediction {
        shape: &pred_shape[..],
        data: pred,
      },
      Prediction {
        shape: &proto_shape[..],
        data: protos,
      },
      (input_width, input_height),
      image.dimensions(),
    )?;
    result.labels = self.labels.clone();

    debug!("检测到 {} 个实例", result.len());
    Ok(result)
  }
}

/// 一个输出张量的形状和数据
#[derive(Debug, Clone, Copy)]
struct Prediction<'a> {
  shape: &'a [i64],
  data: &'a [f32],
}

impl Prediction<'_> {
  fn dims<const N: usize>(&self, name: &str) -> Result<[usize; N], YoloSegError> {
    if self.shape.len() != N || self.shape[0] != 1 || self.shape.iter().any(|&d| d <= 0) {
      return Err(YoloSegError::InvalidOutput(format!(
        "{} has shape {:?}, expected {} positive dimensions with batch 1",
        name, self.shape, N
      )));
    }
    let mut dims = [0usize; N];
    for (dim, &len) in dims.iter_mut().zip(self.shape) {
      *dim = len as usize;
    }
    if dims.iter().product::<usize>() != self.data.len() {
      return Err(YoloSegError::InvalidOutput(format!(
        "{} has {} elements, shape {:?}",
        name,
        self.data.len(),
        self.shape
      )));
    }
    Ok(dims)
  }
}

#[derive(Debug, Clone)]
struct Candidate {
  anchor: usize,
  class_id: usize,
  score: f32,
  bbox: [f32; 4], // 模型输入坐标 [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Copy)]
struct DecodeParams {
  confidence: f32,
  iou: f32,
  max_det: usize,
}

impl Default for DecodeParams {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
      max_det: DEFAULT_MAX_DET,
    }
  }
}

impl DecodeParams {
  /// 解码检测头 `[1, 4 + nc + nm, A]` 和掩码原型 `[1, nm, mh, mw]`。
  ///
  /// 掩码保持原型分辨率，边界框换算到原图坐标。
  fn decode(
    &self,
    pred: Prediction,
    protos: Prediction,
    input: (u32, u32),
    original: (u32, u32),
  ) -> Result<DetectResult, YoloSegError> {
    let [_, channels, anchors] = pred.dims::<3>("output0")?;
    let [_, num_masks, mask_height, mask_width] = protos.dims::<4>("output1")?;
    if channels <= 4 + num_masks {
      return Err(YoloSegError::InvalidOutput(format!(
        "output0 has {} channels, needs more than 4 + {}",
        channels, num_masks
      )));
    }
    let num_classes = channels - 4 - num_masks;
    let at = |channel: usize, anchor: usize| pred.data[channel * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
      let (class_id, score) = (0..num_classes)
        .map(|c| (c, at(4 + c, anchor)))
        .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
      if score < self.confidence {
        continue;
      }

      let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
      candidates.push(Candidate {
        anchor,
        class_id,
        score,
        bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      });
    }
    debug!("候选框数量: {}", candidates.len());

    let kept = self.nms(candidates);
    if kept.is_empty() {
      return Ok(DetectResult::default());
    }

    let protos = ArrayView2::from_shape((num_masks, mask_height * mask_width), protos.data)
      .map_err(|e| YoloSegError::InvalidOutput(e.to_string()))?;
    let (input_width, input_height) = (input.0 as f32, input.1 as f32);
    let (mask_scale_x, mask_scale_y) = (
      mask_width as f32 / input_width,
      mask_height as f32 / input_height,
    );
    let (scale_x, scale_y) = (
      original.0 as f32 / input_width,
      original.1 as f32 / input_height,
    );

    let mut result = DetectResult {
      masks: Some(Vec::with_capacity(kept.len())),
      boxes: Some(Vec::with_capacity(kept.len())),
      ..Default::default()
    };

    for candidate in kept {
      let coeffs = Array1::from_shape_fn(num_masks, |k| at(4 + num_classes + k, candidate.anchor));
      let logits = coeffs.dot(&protos);

      // 掩码只保留边界框内部
      let [x1, y1, x2, y2] = candidate.bbox;
      let (mx1, my1, mx2, my2) = (
        x1 * mask_scale_x,
        y1 * mask_scale_y,
        x2 * mask_scale_x,
        y2 * mask_scale_y,
      );
      let mask = Array2::from_shape_fn((mask_height, mask_width), |(y, x)| {
        let (fx, fy) = (x as f32, y as f32);
        if fx >= mx1 && fx < mx2 && fy >= my1 && fy < my2 {
          sigmoid(logits[y * mask_width + x])
        } else {
          0.0
        }
      });

      if let Some(masks) = result.masks.as_mut() {
        masks.push(mask.into_dyn());
      }
      if let Some(boxes) = result.boxes.as_mut() {
        boxes.push([x1 * scale_x, y1 * scale_y, x2 * scale_x, y2 * scale_y]);
      }
      result.class_ids.push(candidate.class_id as i64);
      result.confidences.push(candidate.score);
    }

    Ok(result)
  }

  /// 按类别的非极大值抑制
  fn nms(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut result: Vec<Candidate> = Vec::new();
    for candidate in candidates {
      if result.len() >= self.max_det {
        break;
      }
      let suppressed = result
        .iter()
        .any(|kept| kept.class_id == candidate.class_id && iou(&kept.bbox, &candidate.bbox) >= self.iou);
      if !suppressed {
        result.push(candidate);
      }
    }
    result
  }
}

fn preprocess(image: &RgbImage, width: u32, height: u32) -> Array4<f32> {
  let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
  Array4::from_shape_fn(
    (1, 3, height as usize, width as usize),
    |(_, c, y, x)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
  )
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

fn round_to_stride(value: u32) -> u32 {
  value.div_ceil(YOLO_SEG_STRIDE).max(1) * YOLO_SEG_STRIDE
}

/// 解析 `imgsz` 元数据，`[640, 480]` 为 (高, 宽)，单个数字为正方形
fn parse_imgsz(text: &str) -> Option<(u32, u32)> {
  let sizes: Vec<u32> = text
    .split(|c: char| !c.is_ascii_digit())
    .filter(|part| !part.is_empty())
    .filter_map(|part| part.parse().ok())
    .collect();
  match sizes.as_slice() {
    [side] if *side > 0 => Some((*side, *side)),
    [height, width] if *height > 0 && *width > 0 => Some((*height, *width)),
    _ => None,
  }
}
