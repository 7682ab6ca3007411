// 该文件是 Qujing （取景） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, aggregate::InterestRect, output::CropSink};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把每个裁剪区域写到日志；`log://?empty` 时空矩形也输出
#[derive(Debug, Default)]
pub struct LogOutput {
  log_empty: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    let log_empty = url.query_pairs().any(|(k, _)| k == "empty");
    Ok(LogOutput { log_empty })
  }
}

impl CropSink for LogOutput {
  type Error = LogOutputError;

  fn apply_crop(&self, rect: InterestRect) -> Result<(), Self::Error> {
    if rect.is_empty() {
      if self.log_empty {
        info!("未检测到目标");
      }
    } else {
      info!("裁剪区域: {}", rect);
    }
    Ok(())
  }
}
