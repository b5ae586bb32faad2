// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use ndarray::ArrayD;

/// 模型推理时的输入尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSize {
  /// 由模型自身决定（元数据或图像原始尺寸）
  Native,
  /// 固定的正方形边长
  Fixed(u32),
}

pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&mut self, image_path: &Path, size: InputSize) -> Result<DetectResult, Self::Error>;
}

/// 模型输出的原始掩码，分辨率为模型输入分辨率，可能带有尾部单一维度
pub type RawMask = ArrayD<f32>;

/// 一次推理的原始检测结果，各序列按下标一一对应
#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub masks: Option<Vec<RawMask>>,
  pub boxes: Option<Vec<[f32; 4]>>, // [x_min, y_min, x_max, y_max]，原图坐标
  pub class_ids: Vec<i64>,
  pub confidences: Vec<f32>,
  pub labels: LabelMap,
}

impl DetectResult {
  /// 没有任何实例的结果
  pub fn empty(labels: LabelMap) -> Self {
    Self {
      labels,
      ..Default::default()
    }
  }

  pub fn len(&self) -> usize {
    self.masks.as_ref().map_or(0, Vec::len)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

mod label;
pub use self::label::LabelMap;

mod adapter;
pub use self::adapter::{DEFAULT_RETRY_SIZE, DetectorAdapter, InferenceError};

#[cfg(feature = "model_yolo_seg")]
mod yolo_seg;
#[cfg(feature = "model_yolo_seg")]
pub use self::yolo_seg::{
  DEFAULT_CONFIDENCE, DEFAULT_IOU, DEFAULT_MAX_DET, YoloSeg, YoloSegBuilder, YoloSegError,
};
