// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/segment_oneshot.rs - 单次实例分割命令
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

use std::{io, path::PathBuf, process::ExitCode};

use clap::{Parser, error::ErrorKind};

use shanan_seg::{
  FromPath,
  model::{
    DEFAULT_CONFIDENCE, DEFAULT_IOU, DEFAULT_MAX_DET, DEFAULT_RETRY_SIZE, YoloSegBuilder,
  },
  output::{ProgressReporter, locate_font},
  task::OneShotTask,
};
use tracing::{error, info};

const USAGE: &str = "Usage: segment-oneshot <model_path> <image_path> <output_path>";

/// 对单张图像做实例分割，在标准输出上逐行报告进度与结果
#[derive(Parser, Debug)]
#[command(name = "segment-oneshot", author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(value_name = "MODEL")]
  pub model: PathBuf,
  /// 输入图像路径
  #[arg(value_name = "IMAGE")]
  pub image: PathBuf,
  /// 标注图像输出路径
  #[arg(value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_IOU, value_name = "THRESHOLD")]
  pub iou: f32,
  /// 原生尺寸推理失败后的重试尺寸
  #[arg(long, default_value_t = DEFAULT_RETRY_SIZE, value_name = "PIXELS")]
  pub retry_size: u32,
  /// 最多保留的实例数
  #[arg(long, default_value_t = DEFAULT_MAX_DET, value_name = "COUNT")]
  pub max_det: usize,
  /// 标签字体（TTF/OTF），未指定时查找系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> ExitCode {
  // 标准输出只承载协议记录，日志写到标准错误
  tracing_subscriber::fmt().with_writer(io::stderr).init();

  let mut reporter = ProgressReporter::new(io::stdout().lock());

  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
    Err(e) => {
      error!("参数错误: {}", e);
      reporter.error(USAGE);
      return ExitCode::FAILURE;
    }
  };

  info!("模型文件路径: {}", args.model.display());
  info!("输入图像: {}", args.image.display());
  info!("输出路径: {}", args.output.display());

  let result = OneShotTask::new(&args.model, &args.image, &args.output)
    .with_retry_size(args.retry_size)
    .with_font(locate_font(args.font.as_deref()))
    .run_task(
      |path| {
        let model = YoloSegBuilder::from_path(path)?
          .confidence(args.confidence)
          .iou(args.iou)
          .max_det(args.max_det)
          .build()?;
        Ok(model)
      },
      &mut reporter,
    );

  match result {
    Ok(_) => ExitCode::SUCCESS,
    Err(_) => ExitCode::FAILURE,
  }
}
