// 该文件是 Qujing （取景） 项目的一部分。
// src/pipeline.rs - 帧流水线：准入控制、单工作线程推理与结果回调
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

//! # 帧流水线
//!
//! 两个状态：**空闲** 与 **处理中**。
//!
//! - 生产者线程调用 [`FramePipeline::submit`]；处理中时直接丢帧，空闲时在调用线程上
//!   同步完成归一化（纹理和 YUV 帧的底层内存在调用返回后不再有效），
//!   然后把模型输入交给唯一的推理线程。
//! - 推理线程执行检测与聚合，调用回调，归还模型输入缓冲，最后回到空闲状态。
//! - 每次被接受的提交恰好产生一次回调；归一化或推理失败时回调收到空矩形。

mod snapshot;

use std::{
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  aggregate::{InterestRect, aggregate, qualifying},
  config::{ConfigError, PipelineConfig},
  frame::{Frame, ModelInput},
  model::{DetectItem, Model},
  normalize::{
    AdapterKind, NoRenderer, NormalizeError, Normalizers, SourceView, TextureRenderer,
    warp_affine_into,
  },
  transform::{AffineTransform, Rotation, build_transform},
};

pub use self::snapshot::{SnapshotError, SnapshotFiles, save_snapshot};

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;

const WORKER_THREAD_NAME: &str = "inference";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("不支持的帧格式: {0}")]
  UnsupportedFormat(String),
  #[error("无法启动推理线程: {0}")]
  WorkerSpawn(std::io::Error),
  #[error("推理线程异常退出")]
  WorkerPanicked,
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
}

/// 一次提交的准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  /// 已交给推理线程，之后会收到一次回调
  Accepted,
  /// 上一帧仍在处理，当前帧被丢弃
  DroppedBusy,
  /// 流水线已挂起，当前帧被丢弃
  Suspended,
}

/// 流水线计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
  pub accepted: u64,
  pub dropped_busy: u64,
  pub dropped_suspended: u64,
  pub unsupported: u64,
  pub completed: u64,
}

#[derive(Default)]
struct Counters {
  accepted: AtomicU64,
  dropped_busy: AtomicU64,
  dropped_suspended: AtomicU64,
  unsupported: AtomicU64,
  completed: AtomicU64,
}

impl Counters {
  fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn load(&self) -> PipelineStats {
    PipelineStats {
      accepted: self.accepted.load(Ordering::Relaxed),
      dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
      dropped_suspended: self.dropped_suspended.load(Ordering::Relaxed),
      unsupported: self.unsupported.load(Ordering::Relaxed),
      completed: self.completed.load(Ordering::Relaxed),
    }
  }
}

/// 生产者与推理线程共享的状态
struct Shared {
  state: AtomicU8,
  counters: Counters,
}

type Callback = Box<dyn FnOnce(InterestRect) + Send + 'static>;

/// 请求调试快照时随任务携带的源图像
struct SnapshotRequest {
  source: Option<RgbImage>,
}

struct Job {
  kind: AdapterKind,
  input: ModelInput,
  transform: Result<AffineTransform, NormalizeError>,
  source_width: u32,
  source_height: u32,
  snapshot: Option<SnapshotRequest>,
  callback: Callback,
}

struct Worker<M> {
  sender: Sender<Job>,
  handle: JoinHandle<M>,
}

/// 推理线程主循环，发送端关闭后退出并交还模型
fn run_worker<M: Model>(
  model: M,
  jobs: Receiver<Job>,
  recycle: Sender<(AdapterKind, ModelInput)>,
  shared: Arc<Shared>,
  config: Arc<PipelineConfig>,
) -> M {
  info!("推理线程启动");

  while let Ok(job) = jobs.recv() {
    let Job {
      kind,
      input,
      transform,
      source_width,
      source_height,
      snapshot,
      callback,
    } = job;

    let now = std::time::Instant::now();
    let (rect, result) = match transform {
      Ok(transform) => {
        let detected = panic::catch_unwind(AssertUnwindSafe(|| {
          model.infer(&input).map(|result| {
            let rect = aggregate(
              &result.items,
              config.confidence_threshold,
              &config.target_label,
              transform.inverse(),
              source_width,
              source_height,
            );
            (rect, result)
          })
        }));
        match detected {
          Ok(Ok((rect, result))) => (rect, Some(result)),
          Ok(Err(e)) => {
            warn!("推理失败: {}", e);
            (InterestRect::EMPTY, None)
          }
          Err(_) => {
            error!("推理过程中发生 panic，本帧按未检测处理");
            (InterestRect::EMPTY, None)
          }
        }
      }
      Err(e) => {
        warn!("帧归一化失败: {}", e);
        (InterestRect::EMPTY, None)
      }
    };
    debug!("处理完成，耗时: {:.2?}，兴趣区域: {}", now.elapsed(), rect);

    if let (Some(request), Some(dir)) = (snapshot, config.snapshot_dir.as_deref()) {
      let boxes: Vec<&DetectItem> = result
        .as_ref()
        .map(|r| qualifying(&r.items, config.confidence_threshold, &config.target_label).collect())
        .unwrap_or_default();
      let sequence = shared.counters.completed.load(Ordering::Relaxed) + 1;
      match save_snapshot(dir, sequence, &input, &boxes, request.source.as_ref(), rect) {
        Ok(files) => info!("调试快照已保存: {:?}", files),
        Err(e) => warn!("调试快照保存失败: {}", e),
      }
    }

    if panic::catch_unwind(AssertUnwindSafe(move || callback(rect))).is_err() {
      error!("结果回调发生 panic");
    }
    Counters::bump(&shared.counters.completed);

    // 先归还缓冲再回到空闲，生产者看到空闲时缓冲一定已在通道中
    let _ = recycle.send((kind, input));
    shared.state.store(IDLE, Ordering::Release);
  }

  info!("推理线程退出");
  model
}

/// 视频帧流水线
///
/// 模型在挂起期间由流水线持有，运行期间由推理线程持有。
/// 新建的流水线处于挂起状态，调用 [`FramePipeline::resume`] 后开始接受帧。
pub struct FramePipeline<M, R = NoRenderer>
where
  M: Model + Send + 'static,
  R: TextureRenderer,
{
  config: Arc<PipelineConfig>,
  normalizers: Normalizers,
  renderer: R,
  shared: Arc<Shared>,
  recycle_tx: Sender<(AdapterKind, ModelInput)>,
  recycle_rx: Receiver<(AdapterKind, ModelInput)>,
  snapshot_armed: AtomicBool,
  model: Option<M>,
  worker: Option<Worker<M>>,
}

impl<M> FramePipeline<M, NoRenderer>
where
  M: Model + Send + 'static,
{
  /// 不带 GPU 渲染器的流水线，纹理帧会得到空矩形
  pub fn new(config: PipelineConfig, model: M) -> Result<Self, PipelineError> {
    Self::with_renderer(config, model, NoRenderer)
  }
}

impl<M, R> FramePipeline<M, R>
where
  M: Model + Send + 'static,
  R: TextureRenderer,
{
  pub fn with_renderer(config: PipelineConfig, model: M, renderer: R) -> Result<Self, PipelineError> {
    config.validate()?;
    let (recycle_tx, recycle_rx) = crossbeam_channel::unbounded();
    Ok(Self {
      normalizers: Normalizers::new(config.input_side, config.maintain_aspect),
      config: Arc::new(config),
      renderer,
      shared: Arc::new(Shared {
        state: AtomicU8::new(IDLE),
        counters: Counters::default(),
      }),
      recycle_tx,
      recycle_rx,
      snapshot_armed: AtomicBool::new(false),
      model: Some(model),
      worker: None,
    })
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn stats(&self) -> PipelineStats {
    self.shared.counters.load()
  }

  pub fn is_suspended(&self) -> bool {
    self.worker.is_none()
  }

  pub fn is_processing(&self) -> bool {
    self.shared.state.load(Ordering::Acquire) == PROCESSING
  }

  /// 提交一帧
  ///
  /// 未知格式返回 [`PipelineError::UnsupportedFormat`]，帧被丢弃，流水线不受影响。
  pub fn submit<F>(&mut self, frame: &Frame, callback: F) -> Result<Admission, PipelineError>
  where
    F: FnOnce(InterestRect) + Send + 'static,
  {
    let Some(kind) = AdapterKind::of(&frame.buffer) else {
      Counters::bump(&self.shared.counters.unsupported);
      debug!("不支持的帧格式 {}，丢弃", frame.buffer.format_name());
      return Err(PipelineError::UnsupportedFormat(
        frame.buffer.format_name().to_string(),
      ));
    };

    if self.worker.is_none() {
      Counters::bump(&self.shared.counters.dropped_suspended);
      debug!("流水线已挂起，丢弃当前帧");
      return Ok(Admission::Suspended);
    }

    if self
      .shared
      .state
      .compare_exchange(IDLE, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      if self.worker.as_ref().is_some_and(|w| w.handle.is_finished()) {
        error!("推理线程已退出，流水线无法继续");
        return Err(PipelineError::WorkerPanicked);
      }
      Counters::bump(&self.shared.counters.dropped_busy);
      debug!("上一帧仍在处理，丢弃当前帧");
      return Ok(Admission::DroppedBusy);
    }

    self.reclaim_inputs();
    let (input, transform) = self.normalizers.normalize(kind, frame, &mut self.renderer);

    let snapshot = self
      .snapshot_armed
      .swap(false, Ordering::AcqRel)
      .then(|| SnapshotRequest {
        source: self.normalizers.source_image(kind, frame),
      });

    let job = Job {
      kind,
      input,
      transform,
      source_width: frame.width(),
      source_height: frame.height(),
      snapshot,
      callback: Box::new(callback),
    };

    let sent = match self.worker.as_ref() {
      Some(worker) => worker.sender.send(job).map_err(|e| e.into_inner()),
      None => Err(job),
    };
    if let Err(job) = sent {
      error!("推理线程已退出，无法提交任务");
      self.normalizers.restore(job.kind, job.input);
      self.shared.state.store(IDLE, Ordering::Release);
      return Err(PipelineError::WorkerPanicked);
    }

    Counters::bump(&self.shared.counters.accepted);
    Ok(Admission::Accepted)
  }

  /// 停止推理线程，等待正在处理的帧完成回调后返回
  pub fn suspend(&mut self) -> Result<(), PipelineError> {
    let Some(Worker { sender, handle }) = self.worker.take() else {
      return Ok(());
    };

    info!("挂起流水线，等待推理线程结束");
    drop(sender);
    let joined = handle.join();

    self.reclaim_inputs();
    self.shared.state.store(IDLE, Ordering::Release);

    match joined {
      Ok(model) => {
        self.model = Some(model);
        info!("流水线已挂起");
        Ok(())
      }
      Err(_) => {
        error!("推理线程异常退出，模型已丢失");
        Err(PipelineError::WorkerPanicked)
      }
    }
  }

  /// 启动推理线程；已在运行时不做任何事
  pub fn resume(&mut self) -> Result<(), PipelineError> {
    if self.worker.is_some() {
      return Ok(());
    }
    let Some(model) = self.model.take() else {
      return Err(PipelineError::WorkerPanicked);
    };

    let (sender, jobs) = crossbeam_channel::bounded(1);
    let recycle = self.recycle_tx.clone();
    let shared = Arc::clone(&self.shared);
    let config = Arc::clone(&self.config);

    let handle = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || run_worker(model, jobs, recycle, shared, config))
      .map_err(|e| {
        error!("无法启动推理线程: {}", e);
        PipelineError::WorkerSpawn(e)
      })?;

    self.worker = Some(Worker { sender, handle });
    info!("流水线已恢复");
    Ok(())
  }

  /// 下一帧处理完成后保存一次调试快照
  pub fn request_snapshot(&self) {
    if self.config.snapshot_dir.is_none() {
      warn!("未配置快照目录，忽略快照请求");
      return;
    }
    self.snapshot_armed.store(true, Ordering::Release);
  }

  /// 释放所有适配器及其缓冲，之后的帧会重新创建适配器
  pub fn release(&mut self) {
    self.reclaim_inputs();
    self.normalizers.release();
  }

  pub fn adapter_created(&self, kind: AdapterKind) -> bool {
    self.normalizers.is_created(kind)
  }

  fn reclaim_inputs(&mut self) {
    while let Ok((kind, input)) = self.recycle_rx.try_recv() {
      self.normalizers.restore(kind, input);
    }
  }
}

impl<M, R> Drop for FramePipeline<M, R>
where
  M: Model + Send + 'static,
  R: TextureRenderer,
{
  fn drop(&mut self) {
    if let Err(e) = self.suspend() {
      warn!("关闭流水线时出错: {}", e);
    }
    self.release();
  }
}

#[derive(Error, Debug)]
pub enum DetectImageError<E: std::error::Error + 'static> {
  #[error("图像归一化失败: {0}")]
  Normalize(#[from] NormalizeError),
  #[error("推理失败: {0}")]
  Model(#[source] E),
}

/// 静态图像的同步检测
///
/// 不经过工作线程；图像被拉伸填满模型输入，不保持宽高比。
pub struct StillImageDetector<M: Model> {
  config: PipelineConfig,
  model: M,
  input: ModelInput,
}

impl<M: Model> StillImageDetector<M> {
  pub fn new(config: PipelineConfig, model: M) -> Result<Self, ConfigError> {
    config.validate()?;
    let input = ModelInput::with_side(config.input_side);
    Ok(Self {
      config,
      model,
      input,
    })
  }

  pub fn detect_image(&mut self, image: &RgbImage) -> Result<InterestRect, DetectImageError<M::Error>> {
    let (width, height) = image.dimensions();
    let transform = build_transform(width, height, self.config.input_side, Rotation::Deg0, false);

    let view = SourceView {
      data: image.as_raw(),
      width: width as usize,
      height: height as usize,
      channels: 3,
    };
    warp_affine_into(&view, &transform, &mut self.input)?;

    let result = self.model.infer(&self.input).map_err(DetectImageError::Model)?;
    Ok(aggregate(
      &result.items,
      self.config.confidence_threshold,
      &self.config.target_label,
      transform.inverse(),
      width,
      height,
    ))
  }

  pub fn model_input(&self) -> &ModelInput {
    &self.input
  }
}
