// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/progress.rs - 进度与结果行协议
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

use std::io::Write;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::extract::InstanceRecord;

pub const SUCCESS_MESSAGE: &str = "Inference completed";

/// 输出流中的一行记录，`type` 字段区分进度与终止记录
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
  Progress {
    progress: u8,
    message: &'a str,
  },
  Success {
    message: &'a str,
    output_path: &'a str,
    segments: &'a [InstanceRecord],
  },
  Error {
    message: &'a str,
  },
}

/// 逐行写出 JSON 记录并立即刷新，调用方可能正在实时读取该流。
///
/// 进度值只增不减且不超过 100；终止记录（成功或错误）只写一次，
/// 之后的任何记录都会被丢弃。
pub struct ProgressReporter<W: Write> {
  writer: W,
  last_progress: u8,
  finished: bool,
}

impl<W: Write> ProgressReporter<W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer,
      last_progress: 0,
      finished: false,
    }
  }

  pub fn progress(&mut self, percent: u8, message: &str) {
    if self.finished {
      warn!("终止记录之后的进度被丢弃: {} {}", percent, message);
      return;
    }
    if percent < self.last_progress {
      warn!("进度回退 {} -> {}，沿用 {}", self.last_progress, percent, self.last_progress);
    }
    let progress = percent.clamp(self.last_progress, 100);
    self.last_progress = progress;
    self.emit(&Record::Progress { progress, message });
  }

  pub fn success(&mut self, output_path: &str, segments: &[InstanceRecord]) {
    self.finish(&Record::Success {
      message: SUCCESS_MESSAGE,
      output_path,
      segments,
    });
  }

  pub fn error(&mut self, message: &str) {
    self.finish(&Record::Error { message });
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  pub fn into_inner(self) -> W {
    self.writer
  }

  fn finish(&mut self, record: &Record) {
    if self.finished {
      warn!("重复的终止记录被丢弃: {:?}", record);
      return;
    }
    self.finished = true;
    self.emit(record);
  }

  // 输出流断开时无法再与调用方通信，直接结束进程
  fn emit(&mut self, record: &Record) {
    debug!("输出记录: {:?}", record);
    let written = serde_json::to_writer(&mut self.writer, record)
      .map_err(std::io::Error::from)
      .and_then(|_| self.writer.write_all(b"\n"))
      .and_then(|_| self.writer.flush());
    if let Err(e) = written {
      error!("写出记录失败: {}", e);
      std::process::exit(1);
    }
  }
}
