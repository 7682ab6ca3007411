// 该文件是 Qujing （取景） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像兴趣区域提取
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use qujing::{
  FromUrl,
  config::PipelineConfig,
  input::InputWrapper,
  model::ReplayModel,
  output::OutputWrapper,
  pipeline::StillImageDetector,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Qujing 单张图像参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 流水线配置
  #[arg(long, value_name = "CONFIG", default_value = "roi://")]
  pub config: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);

  let config = PipelineConfig::from_url(&args.config)?;
  let input = InputWrapper::from_url(&args.input)?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let detector = StillImageDetector::new(config, model)?;
  OneShotTask.run_task(input, detector, output)?;

  Ok(())
}
