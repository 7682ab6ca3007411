// 该文件是 Qujing （取景） 项目的一部分。
// src/normalize/texture.rs - GPU 纹理帧适配器
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
use tracing::warn;

use crate::{
  frame::{ModelInput, TextureBuffer},
  transform::{AffineMatrix, AffineTransform, Rotation, TransformCache, build_transform},
};

use super::NormalizeError;

const RGBA_CHANNELS: usize = 4;

/// 外部 GPU 渲染器
///
/// 按 `transform`（源纹理坐标 -> 目标坐标）把纹理绘制到 `width`×`height`
/// 的离屏目标上，再把 RGBA 像素读回 `dst`（长度为 width*height*4）。
pub trait TextureRenderer {
  type Error: std::error::Error;

  fn render_to_buffer(
    &mut self,
    texture: &TextureBuffer,
    transform: &AffineMatrix,
    width: u32,
    height: u32,
    dst: &mut [u8],
  ) -> Result<(), Self::Error>;
}

impl<R: TextureRenderer + ?Sized> TextureRenderer for Box<R> {
  type Error = R::Error;

  fn render_to_buffer(
    &mut self,
    texture: &TextureBuffer,
    transform: &AffineMatrix,
    width: u32,
    height: u32,
    dst: &mut [u8],
  ) -> Result<(), Self::Error> {
    (**self).render_to_buffer(texture, transform, width, height, dst)
  }
}

#[derive(Debug, Error)]
#[error("没有可用的 GPU 渲染器")]
pub struct NoRendererError;

/// 没有 GPU 的环境中使用，纹理帧一律渲染失败
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRenderer;

impl TextureRenderer for NoRenderer {
  type Error = NoRendererError;

  fn render_to_buffer(
    &mut self,
    _texture: &TextureBuffer,
    _transform: &AffineMatrix,
    _width: u32,
    _height: u32,
    _dst: &mut [u8],
  ) -> Result<(), Self::Error> {
    Err(NoRendererError)
  }
}

/// GPU 纹理适配器
///
/// 纹理的行序与位图相反，渲染前先做一次上下翻转；
/// 之后依次是旋转、缩放到模型输入尺寸。
pub struct TextureAdapter {
  side: u32,
  maintain_aspect: bool,
  staging: Box<[u8]>,
  transforms: TransformCache,
}

impl TextureAdapter {
  pub fn new(side: u32, maintain_aspect: bool) -> Self {
    let size = side as usize * side as usize * RGBA_CHANNELS;
    Self {
      side,
      maintain_aspect,
      staging: vec![0u8; size].into_boxed_slice(),
      transforms: TransformCache::default(),
    }
  }

  pub fn normalize<R: TextureRenderer>(
    &mut self,
    texture: &TextureBuffer,
    rotation: Rotation,
    renderer: &mut R,
    dst: &mut ModelInput,
  ) -> Result<AffineTransform, NormalizeError> {
    let (width, height) = (texture.width, texture.height);
    if width == 0 || height == 0 {
      return Err(NormalizeError::EmptyFrame);
    }

    let (side, maintain_aspect) = (self.side, self.maintain_aspect);
    let transform = *self.transforms.get_or_build(width, height, rotation, || {
      build_transform(width, height, side, rotation, maintain_aspect)
        .pre_concat(&AffineMatrix::vertical_flip(height as f32))
    });

    renderer
      .render_to_buffer(texture, transform.forward(), side, side, &mut self.staging)
      .map_err(|e| {
        warn!("纹理 {} 渲染失败: {}", texture.texture_id, e);
        NormalizeError::Render(e.to_string())
      })?;

    let out = dst.as_mut();
    for (rgb, rgba) in out
      .chunks_exact_mut(3)
      .zip(self.staging.chunks_exact(RGBA_CHANNELS))
    {
      rgb.copy_from_slice(&rgba[..3]);
    }

    Ok(transform)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 把目标缓冲填满固定颜色，并记录收到的变换
  struct SolidRenderer {
    color: [u8; 4],
    last: Option<AffineMatrix>,
  }

  impl TextureRenderer for SolidRenderer {
    type Error = NoRendererError;

    fn render_to_buffer(
      &mut self,
      _texture: &TextureBuffer,
      transform: &AffineMatrix,
      width: u32,
      height: u32,
      dst: &mut [u8],
    ) -> Result<(), Self::Error> {
      assert_eq!(dst.len(), (width * height) as usize * 4);
      for px in dst.chunks_exact_mut(4) {
        px.copy_from_slice(&self.color);
      }
      self.last = Some(*transform);
      Ok(())
    }
  }

  fn make_texture(width: u32, height: u32) -> TextureBuffer {
    TextureBuffer {
      texture_id: 1,
      width,
      height,
    }
  }

  #[test]
  fn drops_alpha_from_staging_buffer() {
    let (texture, rotation) = (make_texture(64, 64), Rotation::Deg0);
    let mut renderer = SolidRenderer {
      color: [1, 2, 3, 255],
      last: None,
    };
    let mut adapter = TextureAdapter::new(8, true);
    let mut dst = ModelInput::with_side(8);
    adapter
      .normalize(&texture, rotation, &mut renderer, &mut dst)
      .unwrap();
    assert!(dst.as_nhwc().chunks(3).all(|px| px == [1, 2, 3]));
  }

  #[test]
  fn flip_is_applied_before_rotation() {
    let (texture, rotation) = (make_texture(200, 100), Rotation::Deg0);
    let mut renderer = SolidRenderer {
      color: [0; 4],
      last: None,
    };
    let mut adapter = TextureAdapter::new(100, true);
    let mut dst = ModelInput::with_side(100);
    let transform = adapter
      .normalize(&texture, rotation, &mut renderer, &mut dst)
      .unwrap();

    // 纹理左下角 (0, 100) 翻转后成为左上角，再缩放 0.5、纵向偏移 25
    let (x, y) = transform.forward().transform_point(0.0, 100.0);
    assert!(x.abs() < 1e-3 && (y - 25.0).abs() < 1e-3);
    assert_eq!(renderer.last, Some(*transform.forward()));
  }

  #[test]
  fn rotation_change_rebuilds_transform() {
    let mut renderer = SolidRenderer {
      color: [0; 4],
      last: None,
    };
    let mut adapter = TextureAdapter::new(100, true);
    let mut dst = ModelInput::with_side(100);

    let (texture, rotation) = (make_texture(200, 100), Rotation::Deg0);
    let upright = adapter
      .normalize(&texture, rotation, &mut renderer, &mut dst)
      .unwrap();
    let (texture, rotation) = (make_texture(200, 100), Rotation::Deg90);
    let rotated = adapter
      .normalize(&texture, rotation, &mut renderer, &mut dst)
      .unwrap();
    assert_ne!(upright, rotated);
  }

  #[test]
  fn renderer_failure_maps_to_render_error() {
    let (texture, rotation) = (make_texture(64, 64), Rotation::Deg0);
    let mut adapter = TextureAdapter::new(8, true);
    let mut dst = ModelInput::with_side(8);
    let err = adapter
      .normalize(&texture, rotation, &mut NoRenderer, &mut dst)
      .unwrap_err();
    assert!(matches!(err, NormalizeError::Render(_)));
  }
}
