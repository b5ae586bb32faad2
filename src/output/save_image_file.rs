// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::FromPath;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Could not write image: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 标注图像的输出位置，格式由扩展名决定
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl FromPath for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_path(path: &Path) -> Result<Self, Self::Error> {
    Ok(SaveImageFileOutput {
      path: path.to_path_buf(),
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;

    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}
