// 该文件是 Qujing （取景） 项目的一部分。
// src/output/record.rs - 裁剪区域记录输出（JSON Lines）
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
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::Local;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, aggregate::InterestRect, output::CropSink};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("记录文件锁已损坏")]
  Poisoned,
}

struct RecordWriter {
  writer: BufWriter<File>,
  sequence: u64,
}

/// 每个裁剪区域追加一行 JSON
pub struct RecordOutput {
  path: PathBuf,
  inner: Mutex<RecordWriter>,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }
    let path = urlencoding::decode(url.path()).map_err(|e| {
      RecordOutputError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;
    Self::create(path.as_ref())
  }
}

impl RecordOutput {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, RecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("记录裁剪区域到 {}", path.display());

    Ok(Self {
      path,
      inner: Mutex::new(RecordWriter {
        writer: BufWriter::new(file),
        sequence: 0,
      }),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl CropSink for RecordOutput {
  type Error = RecordOutputError;

  fn apply_crop(&self, rect: InterestRect) -> Result<(), Self::Error> {
    let mut inner = self.inner.lock().map_err(|_| RecordOutputError::Poisoned)?;
    inner.sequence += 1;

    let line = json!({
      "sequence": inner.sequence,
      "time": Local::now().to_rfc3339(),
      "empty": rect.is_empty(),
      "rect": [rect.left, rect.top, rect.right, rect.bottom],
    });
    serde_json::to_writer(&mut inner.writer, &line)?;
    inner.writer.write_all(b"\n")?;
    inner.writer.flush()?;
    Ok(())
  }
}
