// 该文件是 Qujing （取景） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub const DEFAULT_INPUT_SIDE: u32 = 300;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_TARGET_LABEL: &str = "person";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {key} 的值 '{value}' 无效")]
  InvalidValue { key: String, value: String },
  #[error("置信度阈值 {0} 不在 [0, 1] 范围内")]
  ConfidenceOutOfRange(f32),
  #[error("模型输入边长不能为 0")]
  ZeroSide,
}

/// 流水线的策略参数
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// 模型输入边长 S
  pub input_side: u32,
  pub confidence_threshold: f32,
  pub target_label: String,
  /// 视频流路径是否保持宽高比
  pub maintain_aspect: bool,
  /// 调试快照保存目录
  pub snapshot_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      input_side: DEFAULT_INPUT_SIDE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      target_label: DEFAULT_TARGET_LABEL.to_string(),
      maintain_aspect: true,
      snapshot_dir: None,
    }
  }
}

impl PipelineConfig {
  pub fn with_input_side(mut self, side: u32) -> Self {
    self.input_side = side;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_target_label(mut self, label: impl Into<String>) -> Self {
    self.target_label = label.into();
    self
  }

  pub fn with_maintain_aspect(mut self, maintain_aspect: bool) -> Self {
    self.maintain_aspect = maintain_aspect;
    self
  }

  pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.snapshot_dir = Some(dir.into());
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_side == 0 {
      return Err(ConfigError::ZeroSide);
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::ConfidenceOutOfRange(self.confidence_threshold));
    }
    Ok(())
  }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

impl FromUrlWithScheme for PipelineConfig {
  const SCHEME: &'static str = "roi";
}

impl FromUrl for PipelineConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}'，实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ConfigError::SchemeMismatch);
    }

    let mut config = PipelineConfig::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "side" => config.input_side = parse_value(&key, &value)?,
        "confidence" => config.confidence_threshold = parse_value(&key, &value)?,
        "label" => config.target_label = value.into_owned(),
        "aspect" => config.maintain_aspect = parse_value(&key, &value)?,
        "snapshot" => config.snapshot_dir = Some(PathBuf::from(value.as_ref())),
        other => debug!("忽略未知配置项 {}", other),
      }
    }

    config.validate()?;
    Ok(config)
  }
}
