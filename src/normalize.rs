// 该文件是 Qujing （取景） 项目的一部分。
// src/normalize.rs - 帧归一化：三种像素格式到固定尺寸 RGB 模型输入
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

mod nv21;
mod pixel_buffer;
mod resample;
mod texture;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::{Frame, FrameBuffer, ModelInput},
  transform::AffineTransform,
};

pub use self::{
  nv21::{Nv21Adapter, convert_nv21_to_rgb},
  pixel_buffer::PixelBufferAdapter,
  texture::{NoRenderer, NoRendererError, TextureAdapter, TextureRenderer},
};

pub(crate) use self::resample::{SourceView, warp_affine_into};

#[derive(Error, Debug)]
pub enum NormalizeError {
  #[error("渲染器错误: {0}")]
  Render(String),
  #[error("帧缓冲长度不足: 需要 {expected} 字节，实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("空帧")]
  EmptyFrame,
  #[error("适配器 {expected:?} 无法处理 {actual} 格式的帧")]
  FormatMismatch { expected: AdapterKind, actual: String },
}

/// 适配器种类，与帧的像素格式一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
  PixelBuffer,
  GpuTexture,
  PlanarYuv,
}

impl AdapterKind {
  pub const ALL: [AdapterKind; 3] = [
    AdapterKind::PixelBuffer,
    AdapterKind::GpuTexture,
    AdapterKind::PlanarYuv,
  ];

  /// 帧格式对应的适配器，未知格式返回 None
  pub fn of(buffer: &FrameBuffer) -> Option<Self> {
    match buffer {
      FrameBuffer::Rgba(_) => Some(AdapterKind::PixelBuffer),
      FrameBuffer::Texture(_) => Some(AdapterKind::GpuTexture),
      FrameBuffer::Nv21(_) => Some(AdapterKind::PlanarYuv),
      FrameBuffer::Other { .. } => None,
    }
  }

  fn index(self) -> usize {
    match self {
      AdapterKind::PixelBuffer => 0,
      AdapterKind::GpuTexture => 1,
      AdapterKind::PlanarYuv => 2,
    }
  }
}

/// 三种格式适配器的标签联合
pub enum Normalizer {
  PixelBuffer(PixelBufferAdapter),
  GpuTexture(TextureAdapter),
  PlanarYuv(Nv21Adapter),
}

impl Normalizer {
  pub fn new(kind: AdapterKind, side: u32, maintain_aspect: bool) -> Self {
    match kind {
      AdapterKind::PixelBuffer => {
        Normalizer::PixelBuffer(PixelBufferAdapter::new(side, maintain_aspect))
      }
      AdapterKind::GpuTexture => Normalizer::GpuTexture(TextureAdapter::new(side, maintain_aspect)),
      AdapterKind::PlanarYuv => Normalizer::PlanarYuv(Nv21Adapter::new(side, maintain_aspect)),
    }
  }

  pub fn kind(&self) -> AdapterKind {
    match self {
      Normalizer::PixelBuffer(_) => AdapterKind::PixelBuffer,
      Normalizer::GpuTexture(_) => AdapterKind::GpuTexture,
      Normalizer::PlanarYuv(_) => AdapterKind::PlanarYuv,
    }
  }

  /// 把帧写入 `dst`，返回所用的变换
  ///
  /// 只有纹理帧会调用 `renderer`。
  pub fn normalize<R: TextureRenderer>(
    &mut self,
    frame: &Frame,
    renderer: &mut R,
    dst: &mut ModelInput,
  ) -> Result<AffineTransform, NormalizeError> {
    match (self, &frame.buffer) {
      (Normalizer::PixelBuffer(adapter), FrameBuffer::Rgba(image)) => adapter.normalize(image, dst),
      (Normalizer::GpuTexture(adapter), FrameBuffer::Texture(texture)) => {
        adapter.normalize(texture, frame.rotation, renderer, dst)
      }
      (Normalizer::PlanarYuv(adapter), FrameBuffer::Nv21(buffer)) => adapter.normalize(buffer, dst),
      (normalizer, buffer) => Err(NormalizeError::FormatMismatch {
        expected: normalizer.kind(),
        actual: buffer.format_name().to_string(),
      }),
    }
  }

  /// 源帧的 CPU 副本，纹理帧没有
  pub fn source_image(&self, frame: &Frame) -> Option<RgbImage> {
    match (self, &frame.buffer) {
      (Normalizer::PixelBuffer(adapter), FrameBuffer::Rgba(image)) => {
        Some(adapter.source_image(image))
      }
      (Normalizer::PlanarYuv(adapter), FrameBuffer::Nv21(_)) => adapter.source_image(),
      _ => None,
    }
  }
}

struct AdapterSlot {
  normalizer: Normalizer,
  input: Option<ModelInput>,
}

/// 按格式懒创建的适配器集合
///
/// 每个适配器独占一个模型输入缓冲；缓冲在推理期间借给工作线程，
/// 用完后通过 [`Normalizers::restore`] 归还，不会按帧重新分配。
pub struct Normalizers {
  side: u32,
  maintain_aspect: bool,
  slots: [Option<AdapterSlot>; 3],
}

impl Normalizers {
  pub fn new(side: u32, maintain_aspect: bool) -> Self {
    Self {
      side,
      maintain_aspect,
      slots: [None, None, None],
    }
  }

  fn slot(&mut self, kind: AdapterKind) -> &mut AdapterSlot {
    let (side, maintain_aspect) = (self.side, self.maintain_aspect);
    self.slots[kind.index()].get_or_insert_with(|| {
      info!("创建 {:?} 适配器，模型输入 {}x{}", kind, side, side);
      AdapterSlot {
        normalizer: Normalizer::new(kind, side, maintain_aspect),
        input: Some(ModelInput::with_side(side)),
      }
    })
  }

  /// 归一化一帧，返回借出的模型输入缓冲以及变换结果
  ///
  /// 即使归一化失败也会返回缓冲，调用方负责在用完后归还。
  pub fn normalize<R: TextureRenderer>(
    &mut self,
    kind: AdapterKind,
    frame: &Frame,
    renderer: &mut R,
  ) -> (ModelInput, Result<AffineTransform, NormalizeError>) {
    let side = self.side;
    let slot = self.slot(kind);
    let mut input = slot.input.take().unwrap_or_else(|| {
      debug!("{:?} 适配器的模型输入缓冲未归还，重新分配", kind);
      ModelInput::with_side(side)
    });
    let result = slot.normalizer.normalize(frame, renderer, &mut input);
    (input, result)
  }

  /// 归还借出的模型输入缓冲；适配器已释放时直接丢弃
  pub fn restore(&mut self, kind: AdapterKind, input: ModelInput) {
    if let Some(slot) = self.slots[kind.index()].as_mut() {
      slot.input = Some(input);
    }
  }

  pub fn source_image(&self, kind: AdapterKind, frame: &Frame) -> Option<RgbImage> {
    self.slots[kind.index()]
      .as_ref()
      .and_then(|slot| slot.normalizer.source_image(frame))
  }

  pub fn is_created(&self, kind: AdapterKind) -> bool {
    self.slots[kind.index()].is_some()
  }

  /// 释放全部适配器及其缓冲
  pub fn release(&mut self) {
    for kind in AdapterKind::ALL {
      if self.slots[kind.index()].take().is_some() {
        info!("释放 {:?} 适配器", kind);
      }
    }
  }
}
