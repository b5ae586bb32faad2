// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 任务定义
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

use std::{
  io::Write,
  path::{Path, PathBuf},
};

use ab_glyph::FontArc;
use thiserror::Error;
use tracing::{error, info};

use crate::{
  FromPath,
  extract::{ExtractError, InstanceExtractor, InstanceRecord},
  input::{ImageReadError, InputImage},
  model::{DEFAULT_RETRY_SIZE, DetectorAdapter, InferenceError, Model},
  output::{Draw, ProgressReporter, SaveImageFileError, SaveImageFileOutput},
};

pub const FAILURE_PREFIX: &str = "Inference failed";

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("Could not load model: {0:#}")]
  ModelLoad(anyhow::Error),
  #[error(transparent)]
  ImageRead(#[from] ImageReadError),
  #[error(transparent)]
  Inference(#[from] InferenceError),
  #[error(transparent)]
  Extract(#[from] ExtractError),
  #[error(transparent)]
  Output(#[from] SaveImageFileError),
}

/// 单次推理任务：加载模型，读取图像，推理，提取实例，写出结果。
///
/// 无论成功与否，都恰好写出一条终止记录。
#[derive(Debug, Clone)]
pub struct OneShotTask {
  model_path: PathBuf,
  image_path: PathBuf,
  output_path: PathBuf,
  retry_size: u32,
  font: Option<FontArc>,
}

impl OneShotTask {
  pub fn new(model_path: &Path, image_path: &Path, output_path: &Path) -> Self {
    Self {
      model_path: model_path.to_path_buf(),
      image_path: image_path.to_path_buf(),
      output_path: output_path.to_path_buf(),
      retry_size: DEFAULT_RETRY_SIZE,
      font: None,
    }
  }

  pub fn with_retry_size(mut self, retry_size: u32) -> Self {
    self.retry_size = retry_size;
    self
  }

  /// 标注图像上的文字标签所用字体，`None` 时不绘制标签
  pub fn with_font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  pub fn run_task<M, L, W>(
    self,
    loader: L,
    reporter: &mut ProgressReporter<W>,
  ) -> Result<Vec<InstanceRecord>, TaskError>
  where
    M: Model,
    L: FnOnce(&Path) -> anyhow::Result<M>,
    W: Write,
  {
    info!("开始任务...");
    let now = std::time::Instant::now();
    let result = self.run_stages(loader, reporter);

    match &result {
      Ok(records) => {
        info!("任务完成，耗时: {:.2?}，实例数: {}", now.elapsed(), records.len());
        reporter.success(&self.output_path.display().to_string(), records);
      }
      Err(e) => {
        error!("任务失败: {}", e);
        reporter.error(&format!("{}: {}", FAILURE_PREFIX, e));
      }
    }

    result
  }

  fn run_stages<M, L, W>(
    &self,
    loader: L,
    reporter: &mut ProgressReporter<W>,
  ) -> Result<Vec<InstanceRecord>, TaskError>
  where
    M: Model,
    L: FnOnce(&Path) -> anyhow::Result<M>,
    W: Write,
  {
    reporter.progress(10, "Loading model...");
    info!("模型文件路径: {}", self.model_path.display());
    let model = loader(&self.model_path).map_err(TaskError::ModelLoad)?;
    let mut adapter = DetectorAdapter::new(model).with_retry_size(self.retry_size);

    reporter.progress(30, "Reading image...");
    info!("输入图像: {}", self.image_path.display());
    let image = InputImage::from_path(&self.image_path)?;

    reporter.progress(
      50,
      &format!(
        "Running inference on {}x{} image...",
        image.width(),
        image.height()
      ),
    );
    let detections = adapter.infer(&self.image_path, reporter)?;

    reporter.progress(80, "Processing results...");
    let output = SaveImageFileOutput::from_path(&self.output_path)?;
    let extractor = InstanceExtractor::new(output.path())
      .with_draw(Draw::default().with_font(self.font.clone()));
    let mut canvas = image.as_rgb().clone();
    let segments = extractor.extract(&image, &detections, &mut canvas)?;

    // 先写标注图像，失败时不留下实例图像
    reporter.progress(90, "Saving outputs...");
    output.save_image(&canvas)?;
    let records = extractor.save_segments(segments)?;
    info!(
      "保留 {} / {} 个实例，分割结果目录: {}",
      records.len(),
      detections.len(),
      extractor.layout().directory().display()
    );

    reporter.progress(100, "Complete!");
    Ok(records)
  }
}
