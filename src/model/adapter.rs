// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/adapter.rs - 检测器适配与重试策略
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

use std::{io::Write, path::Path};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  model::{DetectResult, InputSize, Model},
  output::ProgressReporter,
};

/// 原生尺寸推理失败后重试所用的正方形输入边长
pub const DEFAULT_RETRY_SIZE: u32 = 640;

pub const RETRY_PROGRESS: u8 = 50;
pub const RETRY_MESSAGE: &str = "Retrying with standard size...";

#[derive(Error, Debug)]
#[error("{native}; retry with imgsz={retry_size} failed: {retry}")]
pub struct InferenceError {
  pub native: String,
  pub retry_size: u32,
  pub retry: String,
}

/// 包装外部模型：先以原生尺寸推理，失败后以固定尺寸重试一次。
///
/// 重试得到的掩码分辨率可能与首次推理不同，后续的掩码校正按各自的
/// 分辨率处理，这里不做统一。
pub struct DetectorAdapter<M> {
  model: M,
  retry_size: u32,
}

impl<M: Model> DetectorAdapter<M> {
  pub fn new(model: M) -> Self {
    Self {
      model,
      retry_size: DEFAULT_RETRY_SIZE,
    }
  }

  pub fn with_retry_size(mut self, retry_size: u32) -> Self {
    self.retry_size = retry_size;
    self
  }

  pub fn infer<W: Write>(
    &mut self,
    image_path: &Path,
    reporter: &mut ProgressReporter<W>,
  ) -> Result<DetectResult, InferenceError> {
    let now = std::time::Instant::now();
    let result = match self.model.infer(image_path, InputSize::Native) {
      Ok(result) => result,
      Err(native) => {
        warn!("原生尺寸推理失败: {}，以 {} 重试", native, self.retry_size);
        reporter.progress(RETRY_PROGRESS, RETRY_MESSAGE);
        self
          .model
          .infer(image_path, InputSize::Fixed(self.retry_size))
          .map_err(|retry| InferenceError {
            native: native.to_string(),
            retry_size: self.retry_size,
            retry: retry.to_string(),
          })?
      }
    };
    info!("推理完成，耗时: {:.2?}，实例数: {}", now.elapsed(), result.len());

    check_lengths(&result);
    Ok(result)
  }
}

fn check_lengths(result: &DetectResult) {
  let masks = result.masks.as_ref().map_or(0, Vec::len);
  let boxes = result.boxes.as_ref().map_or(0, Vec::len);
  let class_ids = result.class_ids.len();
  let confidences = result.confidences.len();
  if masks != boxes || masks != class_ids || masks != confidences {
    warn!(
      "检测结果长度不一致: 掩码 {}, 边界框 {}, 类别 {}, 置信度 {}",
      masks, boxes, class_ids, confidences
    );
  }
}
