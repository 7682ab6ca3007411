// 该文件是 Qujing （取景） 项目的一部分。
// src/normalize/nv21.rs - NV21 平面 YUV 帧适配器
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

use image::RgbImage;
use tracing::debug;

use crate::{
  frame::{ModelInput, Nv21Buffer},
  transform::{AffineTransform, Rotation, TransformCache, build_transform},
};

use super::{
  NormalizeError,
  resample::{SourceView, warp_affine_into},
};

// BT.601 有限范围，10 位定点系数
const MAX_CHANNEL_VALUE: i32 = 262143;

/// 单像素 YUV -> RGB
#[inline]
fn yuv_to_rgb(y: i32, u: i32, v: i32) -> [u8; 3] {
  let y = (y - 16).max(0);
  let u = u - 128;
  let v = v - 128;

  let y1192 = 1192 * y;
  let r = (y1192 + 1634 * v).clamp(0, MAX_CHANNEL_VALUE);
  let g = (y1192 - 833 * v - 400 * u).clamp(0, MAX_CHANNEL_VALUE);
  let b = (y1192 + 2066 * u).clamp(0, MAX_CHANNEL_VALUE);

  [(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8]
}

/// NV21 转紧凑 RGB，`rgb` 长度必须为 width*height*3
pub fn convert_nv21_to_rgb(data: &[u8], width: usize, height: usize, rgb: &mut [u8]) {
  let frame_size = width * height;
  let chroma_stride = width.div_ceil(2) * 2;

  for j in 0..height {
    let uv_row = frame_size + (j >> 1) * chroma_stride;
    for i in 0..width {
      let y = data[j * width + i] as i32;
      let uv = uv_row + (i >> 1) * 2;
      let v = data[uv] as i32;
      let u = data[uv + 1] as i32;

      let out = (j * width + i) * 3;
      rgb[out..out + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
    }
  }
}

/// NV21 帧适配器
///
/// 工作缓冲（width×height 的 RGB）只在帧尺寸变化时重新分配。
pub struct Nv21Adapter {
  side: u32,
  maintain_aspect: bool,
  rgb: Vec<u8>,
  transforms: TransformCache,
}

impl Nv21Adapter {
  pub fn new(side: u32, maintain_aspect: bool) -> Self {
    Self {
      side,
      maintain_aspect,
      rgb: Vec::new(),
      transforms: TransformCache::default(),
    }
  }

  pub fn normalize(
    &mut self,
    buffer: &Nv21Buffer,
    dst: &mut ModelInput,
  ) -> Result<AffineTransform, NormalizeError> {
    let (width, height) = (buffer.width(), buffer.height());
    if width == 0 || height == 0 {
      return Err(NormalizeError::EmptyFrame);
    }

    let expected = Nv21Buffer::expected_len(width, height);
    if buffer.data().len() < expected {
      return Err(NormalizeError::BufferSizeMismatch {
        expected,
        actual: buffer.data().len(),
      });
    }

    if self.transforms.last_size() != Some((width, height)) {
      debug!("NV21 帧尺寸变为 {}x{}，重新分配工作缓冲", width, height);
      self.rgb = vec![0u8; width as usize * height as usize * 3];
    }

    let (side, maintain_aspect) = (self.side, self.maintain_aspect);
    let transform = *self.transforms.get_or_build(width, height, Rotation::Deg0, || {
      build_transform(width, height, side, Rotation::Deg0, maintain_aspect)
    });

    convert_nv21_to_rgb(buffer.data(), width as usize, height as usize, &mut self.rgb);

    let view = SourceView {
      data: &self.rgb,
      width: width as usize,
      height: height as usize,
      channels: 3,
    };
    warp_affine_into(&view, &transform, dst)?;
    Ok(transform)
  }

  /// 最近一帧转换后的 RGB 图像
  pub fn source_image(&self) -> Option<RgbImage> {
    let (width, height) = self.transforms.last_size()?;
    RgbImage::from_raw(width, height, self.rgb.clone())
  }

  /// 工作缓冲当前容量（字节）
  pub fn scratch_capacity(&self) -> usize {
    self.rgb.capacity()
  }
}
