// 该文件是 Qujing （取景） 项目的一部分。
// tests/pipeline.rs - 帧流水线集成测试
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
  convert::Infallible,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use image::{Rgba, RgbaImage};

use qujing::{
  aggregate::InterestRect,
  config::PipelineConfig,
  frame::{Frame, FrameBuffer, ModelInput, Nv21Buffer, TextureBuffer},
  model::{DetectItem, DetectResult, Model},
  normalize::{AdapterKind, NoRendererError, TextureRenderer},
  pipeline::{Admission, FramePipeline, PipelineError},
  transform::{AffineMatrix, Rotation},
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// 每次推理都等待闸门放行，模拟慢速检测器
struct GatedModel {
  gate: Receiver<()>,
  calls: Arc<AtomicUsize>,
}

impl Model for GatedModel {
  type Error = Infallible;

  fn infer(&self, input: &ModelInput) -> Result<DetectResult, Self::Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let _ = self.gate.recv();
    let side = input.side() as f32;
    Ok(DetectResult::from(vec![DetectItem::new(
      "person",
      0.9,
      [side / 4.0, side / 4.0, side * 3.0 / 4.0, side * 3.0 / 4.0],
    )]))
  }
}

fn gated_model() -> (GatedModel, Sender<()>, Arc<AtomicUsize>) {
  let (gate_tx, gate) = crossbeam_channel::unbounded();
  let calls = Arc::new(AtomicUsize::new(0));
  (
    GatedModel {
      gate,
      calls: Arc::clone(&calls),
    },
    gate_tx,
    calls,
  )
}

/// 第一次推理时 panic，之后正常返回一个人
#[derive(Default)]
struct PanicOnceModel {
  panicked: AtomicBool,
}

impl Model for PanicOnceModel {
  type Error = Infallible;

  fn infer(&self, input: &ModelInput) -> Result<DetectResult, Self::Error> {
    if !self.panicked.swap(true, Ordering::SeqCst) {
      panic!("检测器内部错误");
    }
    let side = input.side() as f32;
    Ok(DetectResult::from(vec![DetectItem::new(
      "person",
      0.9,
      [side / 4.0, side / 4.0, side * 3.0 / 4.0, side * 3.0 / 4.0],
    )]))
  }
}

/// 记录调用次数并把目标填成灰色
#[derive(Clone, Default)]
struct CountingRenderer {
  calls: Arc<AtomicUsize>,
}

impl TextureRenderer for CountingRenderer {
  type Error = NoRendererError;

  fn render_to_buffer(
    &mut self,
    _texture: &TextureBuffer,
    _transform: &AffineMatrix,
    _width: u32,
    _height: u32,
    dst: &mut [u8],
  ) -> Result<(), Self::Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    dst.fill(128);
    Ok(())
  }
}

fn rgba_frame(width: u32, height: u32) -> Frame {
  Frame::new(FrameBuffer::Rgba(RgbaImage::from_pixel(
    width,
    height,
    Rgba([200, 100, 50, 255]),
  )))
}

fn nv21_frame(width: u32, height: u32) -> Frame {
  let data = vec![128u8; Nv21Buffer::expected_len(width, height)];
  Frame::new(FrameBuffer::Nv21(
    Nv21Buffer::new(width, height, data).unwrap(),
  ))
}

fn texture_frame(width: u32, height: u32) -> Frame {
  Frame::new(FrameBuffer::Texture(TextureBuffer {
    texture_id: 42,
    width,
    height,
  }))
  .with_rotation(Rotation::Deg0)
}

fn collector() -> (
  impl Fn() -> Box<dyn FnOnce(InterestRect) + Send>,
  Receiver<InterestRect>,
) {
  let (tx, rx) = crossbeam_channel::unbounded();
  let make = move || {
    let tx = tx.clone();
    Box::new(move |rect: InterestRect| {
      let _ = tx.send(rect);
    }) as Box<dyn FnOnce(InterestRect) + Send>
  };
  (make, rx)
}

fn wait_idle<M: Model + Send + 'static, R: TextureRenderer>(pipeline: &FramePipeline<M, R>) {
  let deadline = Instant::now() + TIMEOUT;
  while pipeline.is_processing() {
    assert!(Instant::now() < deadline, "流水线没有回到空闲状态");
    thread::yield_now();
  }
}

#[test]
fn second_frame_is_dropped_while_processing() {
  let (model, gate, _) = gated_model();
  let mut pipeline = FramePipeline::new(PipelineConfig::default(), model).unwrap();
  pipeline.resume().unwrap();

  let callbacks = Arc::new(AtomicUsize::new(0));
  let submit = |pipeline: &mut FramePipeline<GatedModel>| {
    let callbacks = Arc::clone(&callbacks);
    pipeline
      .submit(&rgba_frame(640, 480), move |_| {
        callbacks.fetch_add(1, Ordering::SeqCst);
      })
      .unwrap()
  };

  assert_eq!(submit(&mut pipeline), Admission::Accepted);
  assert_eq!(submit(&mut pipeline), Admission::DroppedBusy);

  gate.send(()).unwrap();
  pipeline.suspend().unwrap();

  assert_eq!(callbacks.load(Ordering::SeqCst), 1);
  let stats = pipeline.stats();
  assert_eq!((stats.accepted, stats.dropped_busy, stats.completed), (1, 1, 1));
}

#[test]
fn suspend_waits_for_pending_callback() {
  let (model, gate, calls) = gated_model();
  let mut pipeline = FramePipeline::new(PipelineConfig::default(), model).unwrap();
  pipeline.resume().unwrap();

  let fired = Arc::new(AtomicUsize::new(0));
  let flag = Arc::clone(&fired);
  pipeline
    .submit(&rgba_frame(320, 240), move |_| {
      thread::sleep(Duration::from_millis(20));
      flag.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

  // 推理开始后再放行
  let deadline = Instant::now() + TIMEOUT;
  while calls.load(Ordering::SeqCst) == 0 {
    assert!(Instant::now() < deadline);
    thread::yield_now();
  }
  let releaser = thread::spawn(move || {
    thread::sleep(Duration::from_millis(100));
    gate.send(()).unwrap();
  });

  pipeline.suspend().unwrap();
  assert_eq!(fired.load(Ordering::SeqCst), 1);
  assert!(pipeline.is_suspended());
  assert!(!pipeline.is_processing());
  releaser.join().unwrap();
}

#[test]
fn resume_after_suspend_accepts_frames_again() {
  let (model, gate, _) = gated_model();
  let mut pipeline = FramePipeline::new(PipelineConfig::default(), model).unwrap();
  let (make, rx) = collector();

  assert_eq!(
    pipeline.submit(&rgba_frame(64, 64), make()).unwrap(),
    Admission::Suspended
  );

  for _ in 0..2 {
    pipeline.resume().unwrap();
    gate.send(()).unwrap();
    assert_eq!(
      pipeline.submit(&rgba_frame(64, 64), make()).unwrap(),
      Admission::Accepted
    );
    rx.recv_timeout(TIMEOUT).unwrap();
    pipeline.suspend().unwrap();
  }
  assert_eq!(pipeline.stats().completed, 2);
}

#[test]
fn formats_dispatch_to_their_own_adapter() {
  let (model, gate, _) = gated_model();
  let renderer = CountingRenderer::default();
  let rendered = Arc::clone(&renderer.calls);
  let mut pipeline =
    FramePipeline::with_renderer(PipelineConfig::default(), model, renderer).unwrap();
  pipeline.resume().unwrap();
  let (make, rx) = collector();

  gate.send(()).unwrap();
  pipeline.submit(&texture_frame(1280, 720), make()).unwrap();
  let rect = rx.recv_timeout(TIMEOUT).unwrap();
  wait_idle(&pipeline);
  assert_eq!(rendered.load(Ordering::SeqCst), 1);
  assert!(!rect.is_empty());
  assert!(pipeline.adapter_created(AdapterKind::GpuTexture));
  assert!(!pipeline.adapter_created(AdapterKind::PlanarYuv));

  gate.send(()).unwrap();
  pipeline.submit(&nv21_frame(640, 480), make()).unwrap();
  rx.recv_timeout(TIMEOUT).unwrap();
  wait_idle(&pipeline);
  assert_eq!(rendered.load(Ordering::SeqCst), 1);
  assert!(pipeline.adapter_created(AdapterKind::PlanarYuv));
  assert!(!pipeline.adapter_created(AdapterKind::PixelBuffer));
}

#[test]
fn render_failure_yields_empty_rect() {
  let (model, _gate, calls) = gated_model();
  let mut pipeline = FramePipeline::new(PipelineConfig::default(), model).unwrap();
  pipeline.resume().unwrap();
  let (make, rx) = collector();

  assert_eq!(
    pipeline.submit(&texture_frame(640, 480), make()).unwrap(),
    Admission::Accepted
  );
  assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), InterestRect::EMPTY);
  wait_idle(&pipeline);
  // 归一化失败时不调用检测器
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  pipeline.suspend().unwrap();
}

#[test]
fn unknown_format_is_rejected_without_callback() {
  let (model, _gate, _) = gated_model();
  let mut pipeline = FramePipeline::new(PipelineConfig::default(), model).unwrap();
  pipeline.resume().unwrap();
  let (make, rx) = collector();

  let frame = Frame::new(FrameBuffer::Other {
    format: "I420".to_string(),
    width: 640,
    height: 480,
  });
  assert!(matches!(
    pipeline.submit(&frame, make()),
    Err(PipelineError::UnsupportedFormat(format)) if format == "I420"
  ));
  assert!(!pipeline.is_processing());
  assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
  assert_eq!(pipeline.stats().unsupported, 1);
  pipeline.suspend().unwrap();
}

#[test]
fn rect_is_mapped_back_to_source_frame() {
  let (model, gate, _) = gated_model();
  let mut pipeline = FramePipeline::new(PipelineConfig::default(), model).unwrap();
  pipeline.resume().unwrap();
  let (make, rx) = collector();

  // 模型输入中 [75, 225] 的方框对应 600x300 帧（缩放 0.5，纵向偏移 75）
  gate.send(()).unwrap();
  pipeline.submit(&rgba_frame(600, 300), make()).unwrap();
  let rect = rx.recv_timeout(TIMEOUT).unwrap();
  assert_eq!(rect, InterestRect::new(150, 0, 450, 300));
  pipeline.suspend().unwrap();
}

#[test]
fn inference_panic_yields_empty_rect_and_recovers() {
  let mut pipeline =
    FramePipeline::new(PipelineConfig::default(), PanicOnceModel::default()).unwrap();
  pipeline.resume().unwrap();
  let (make, rx) = collector();

  assert_eq!(
    pipeline.submit(&rgba_frame(320, 240), make()).unwrap(),
    Admission::Accepted
  );
  assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), InterestRect::EMPTY);
  wait_idle(&pipeline);

  assert_eq!(
    pipeline.submit(&rgba_frame(320, 240), make()).unwrap(),
    Admission::Accepted
  );
  assert!(!rx.recv_timeout(TIMEOUT).unwrap().is_empty());
  wait_idle(&pipeline);

  pipeline.suspend().unwrap();
  assert_eq!(pipeline.stats().completed, 2);
}
