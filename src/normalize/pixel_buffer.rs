// 该文件是 Qujing （取景） 项目的一部分。
// src/normalize/pixel_buffer.rs - RGBA 位图帧适配器
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

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::{
  frame::ModelInput,
  transform::{AffineTransform, Rotation, TransformCache, build_transform},
};

use super::{
  NormalizeError,
  resample::{SourceView, warp_affine_into},
};

/// CPU 位图适配器
///
/// 远端视频流的尺寸会随网络状况变化，变换按尺寸缓存。
pub struct PixelBufferAdapter {
  side: u32,
  maintain_aspect: bool,
  transforms: TransformCache,
}

impl PixelBufferAdapter {
  pub fn new(side: u32, maintain_aspect: bool) -> Self {
    Self {
      side,
      maintain_aspect,
      transforms: TransformCache::default(),
    }
  }

  pub fn normalize(
    &mut self,
    image: &RgbaImage,
    dst: &mut ModelInput,
  ) -> Result<AffineTransform, NormalizeError> {
    let (width, height) = image.dimensions();
    let (side, maintain_aspect) = (self.side, self.maintain_aspect);
    let transform = *self.transforms.get_or_build(width, height, Rotation::Deg0, || {
      build_transform(width, height, side, Rotation::Deg0, maintain_aspect)
    });

    let view = SourceView {
      data: image.as_raw(),
      width: width as usize,
      height: height as usize,
      channels: 4,
    };
    warp_affine_into(&view, &transform, dst)?;
    Ok(transform)
  }

  /// 调试快照用的源图像副本
  pub fn source_image(&self, image: &RgbaImage) -> RgbImage {
    DynamicImage::ImageRgba8(image.clone()).to_rgb8()
  }
}
