// 该文件是 Qujing （取景） 项目的一部分。
// src/task.rs - 任务驱动
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
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::Model,
  normalize::TextureRenderer,
  output::CropSink,
  pipeline::{Admission, FramePipeline, PipelineError, StillImageDetector},
};

pub trait Task<I, P, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<(), Self::Error>;
}

/// 对第一帧做一次同步检测
pub struct OneShotTask;

impl<I, M, O> Task<I, StillImageDetector<M>, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  M: Model,
  O: CropSink,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    mut detector: StillImageDetector<M>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let image = frame.buffer.to_rgb_image().ok_or_else(|| {
      anyhow::anyhow!("{} 格式的帧无法在 CPU 上读取", frame.buffer.format_name())
    })?;
    info!("输入帧获取成功，开始推理...");

    let now = Instant::now();
    let rect = detector.detect_image(&image)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.apply_crop(rect)?;

    Ok(())
  }
}

/// 把输入的每一帧提交给流水线，直到输入结束、达到帧数或收到中断
pub struct ContinuousTask {
  frame_number: Option<usize>,
  realtime: bool,
  interrupt_handler: bool,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      realtime: false,
      interrupt_handler: true,
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 按帧时间戳节流，模拟实时到达的视频流
  pub fn with_realtime(mut self, realtime: bool) -> Self {
    self.realtime = realtime;
    self
  }

  pub fn with_interrupt_handler(mut self, install: bool) -> Self {
    self.interrupt_handler = install;
    self
  }
}

impl<I, M, R, O> Task<I, FramePipeline<M, R>, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  M: Model + Send + 'static,
  R: TextureRenderer,
  O: CropSink + 'static,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    mut pipeline: FramePipeline<M, R>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = crossbeam_channel::bounded(1);

    if self.interrupt_handler {
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.try_send(());
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })
      .context("无法设置 Ctrl-C 处理器")?;
    }

    pipeline.resume()?;
    let output = Arc::new(output);
    let started = Instant::now();

    let mut frame_index = 0;
    for frame in input {
      frame_index += 1;

      if self.realtime {
        if let Some(wait) = frame.timestamp.checked_sub(started.elapsed()) {
          thread::sleep(wait);
        }
      }

      let sink = Arc::clone(&output);
      let admission = pipeline.submit(&frame, move |rect| {
        if let Err(e) = sink.apply_crop(rect) {
          warn!("输出裁剪区域失败: {}", e);
        }
      });
      match admission {
        Ok(Admission::Accepted) => debug!("第 {} 帧已提交", frame_index),
        Ok(admission) => debug!("第 {} 帧被丢弃: {:?}", frame_index, admission),
        Err(PipelineError::UnsupportedFormat(format)) => {
          warn!("第 {} 帧格式 {} 不受支持，跳过", frame_index, format)
        }
        Err(e) => return Err(e.into()),
      }

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    pipeline.suspend()?;
    let stats = pipeline.stats();
    info!(
      "任务完成，共 {} 帧：处理 {}，忙时丢弃 {}，格式不支持 {}",
      frame_index, stats.completed, stats.dropped_busy, stats.unsupported
    );
    Ok(())
  }
}
