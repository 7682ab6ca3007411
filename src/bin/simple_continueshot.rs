// 该文件是 Qujing （取景） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续帧兴趣区域提取
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
  pipeline::FramePipeline,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Qujing 连续帧参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，例如 replay:///path/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 nv21:///path/preview.yuv?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 log:// 或 record:///path/crops.jsonl
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 流水线配置
  #[arg(long, value_name = "CONFIG", default_value = "roi://")]
  pub config: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 按帧时间戳节流
  #[arg(long)]
  pub realtime: bool,

  /// 处理第一帧时保存调试快照
  #[arg(long)]
  pub snapshot: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);
  info!("配置: {}", args.config);

  let config = PipelineConfig::from_url(&args.config)?;
  let input = InputWrapper::from_url(&args.input)?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let pipeline = FramePipeline::new(config, model)?;
  if args.snapshot {
    pipeline.request_snapshot();
  }

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_realtime(args.realtime)
    .run_task(input, pipeline, output)?;

  Ok(())
}
