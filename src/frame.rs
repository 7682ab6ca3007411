// 该文件是 Qujing （取景） 项目的一部分。
// src/frame.rs - 视频帧与模型输入帧定义
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

use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Rgb, RgbImage, RgbaImage};

use crate::{normalize::convert_nv21_to_rgb, transform::Rotation};

const RGB_CHANNELS: usize = 3;

/// NV21（YUV420SP）帧缓冲：Y 平面之后紧跟交错的 VU 平面
#[derive(Debug, Clone)]
pub struct Nv21Buffer {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl Nv21Buffer {
  /// NV21 所需字节数，色度平面按偶数宽高取整
  pub fn expected_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    let chroma = w.div_ceil(2) * h.div_ceil(2) * 2;
    w * h + chroma
  }

  /// 数据长度不足时返回 None
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() < Self::expected_len(width, height) {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }
}

/// GPU 纹理引用，只有外部渲染器能读取其中的像素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBuffer {
  pub texture_id: u32,
  pub width: u32,
  pub height: u32,
}

/// 帧像素数据，按像素格式区分
#[derive(Debug, Clone)]
pub enum FrameBuffer {
  /// CPU 侧 RGBA 位图
  Rgba(RgbaImage),
  /// GPU 纹理
  Texture(TextureBuffer),
  /// 平面 YUV (NV21)
  Nv21(Nv21Buffer),
  /// 其它格式（例如 I420），没有对应的归一化器
  Other {
    format: String,
    width: u32,
    height: u32,
  },
}

impl FrameBuffer {
  pub fn width(&self) -> u32 {
    match self {
      FrameBuffer::Rgba(image) => image.width(),
      FrameBuffer::Texture(texture) => texture.width,
      FrameBuffer::Nv21(buffer) => buffer.width(),
      FrameBuffer::Other { width, .. } => *width,
    }
  }

  pub fn height(&self) -> u32 {
    match self {
      FrameBuffer::Rgba(image) => image.height(),
      FrameBuffer::Texture(texture) => texture.height,
      FrameBuffer::Nv21(buffer) => buffer.height(),
      FrameBuffer::Other { height, .. } => *height,
    }
  }

  pub fn format_name(&self) -> &str {
    match self {
      FrameBuffer::Rgba(_) => "RGBA",
      FrameBuffer::Texture(_) => "TEXTURE",
      FrameBuffer::Nv21(_) => "NV21",
      FrameBuffer::Other { format, .. } => format,
    }
  }

  /// CPU 可读的帧转为 RGB 图像，纹理和未知格式返回 None
  pub fn to_rgb_image(&self) -> Option<RgbImage> {
    match self {
      FrameBuffer::Rgba(image) => Some(DynamicImage::ImageRgba8(image.clone()).to_rgb8()),
      FrameBuffer::Nv21(buffer) => {
        let (width, height) = (buffer.width(), buffer.height());
        let mut rgb = vec![0u8; width as usize * height as usize * RGB_CHANNELS];
        convert_nv21_to_rgb(buffer.data(), width as usize, height as usize, &mut rgb);
        RgbImage::from_raw(width, height, rgb)
      }
      FrameBuffer::Texture(_) | FrameBuffer::Other { .. } => None,
    }
  }
}

/// 视频帧
#[derive(Debug, Clone)]
pub struct Frame {
  pub buffer: FrameBuffer,
  /// 相机旋转元数据，只有纹理帧会用到
  pub rotation: Rotation,
  /// 到达时间戳
  pub timestamp: Duration,
}

impl Frame {
  pub fn new(buffer: FrameBuffer) -> Self {
    Self {
      buffer,
      rotation: Rotation::Deg0,
      timestamp: Duration::ZERO,
    }
  }

  pub fn with_rotation(mut self, rotation: Rotation) -> Self {
    self.rotation = rotation;
    self
  }

  pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
    self.timestamp = timestamp;
    self
  }

  pub fn width(&self) -> u32 {
    self.buffer.width()
  }

  pub fn height(&self) -> u32 {
    self.buffer.height()
  }
}

/// 模型输入：side×side 的 RGB 缓冲（NHWC 排列）
#[derive(Debug, Clone)]
pub struct ModelInput {
  side: u32,
  data: Box<[u8]>,
}

impl ModelInput {
  pub fn with_side(side: u32) -> Self {
    let size = RGB_CHANNELS * (side as usize) * (side as usize);
    Self {
      side,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn side(&self) -> u32 {
    self.side
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for ModelInput {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for ModelInput {
  fn to_rgb_image(&self) -> RgbImage {
    let side = self.side;
    let data = self.as_nhwc();

    ImageBuffer::from_fn(side, side, |x, y| {
      let idx = (y as usize * side as usize + x as usize) * RGB_CHANNELS;
      Rgb([data[idx], data[idx + 1], data[idx + 2]])
    })
  }
}
