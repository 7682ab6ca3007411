// 该文件是 Qujing （取景） 项目的一部分。
// src/normalize/resample.rs - 仿射重采样
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

use crate::{frame::ModelInput, transform::AffineTransform};

use super::NormalizeError;

/// 源图像的一个只读视图，每像素 `channels` 字节，取前三个作为 RGB
pub(crate) struct SourceView<'a> {
  pub data: &'a [u8],
  pub width: usize,
  pub height: usize,
  pub channels: usize,
}

impl SourceView<'_> {
  fn check(&self) -> Result<(), NormalizeError> {
    if self.width == 0 || self.height == 0 {
      return Err(NormalizeError::EmptyFrame);
    }
    let expected = self.width * self.height * self.channels;
    if self.data.len() < expected {
      return Err(NormalizeError::BufferSizeMismatch {
        expected,
        actual: self.data.len(),
      });
    }
    Ok(())
  }

  #[inline]
  fn pixel(&self, x: usize, y: usize, c: usize) -> f32 {
    self.data[(y * self.width + x) * self.channels + c] as f32
  }
}

/// 按 `transform` 将源图像双线性重采样到模型输入中
///
/// 对每个目标像素中心做逆映射回源图像；落在源图像之外的像素填黑。
/// 所有格式的适配器共用这一个实现，保证不同来源的帧得到一致的输入。
pub(crate) fn warp_affine_into(
  src: &SourceView<'_>,
  transform: &AffineTransform,
  dst: &mut ModelInput,
) -> Result<(), NormalizeError> {
  src.check()?;

  let side = dst.side() as usize;
  let inverse = *transform.inverse();
  let max_x = src.width as f32;
  let max_y = src.height as f32;
  let out = dst.as_mut();

  for dst_y in 0..side {
    for dst_x in 0..side {
      let (sx, sy) = inverse.transform_point(dst_x as f32 + 0.5, dst_y as f32 + 0.5);
      let idx = (dst_y * side + dst_x) * 3;

      if !(0.0..=max_x).contains(&sx) || !(0.0..=max_y).contains(&sy) {
        out[idx..idx + 3].fill(0);
        continue;
      }

      // 转到以像素左上角为原点的采样坐标
      let fx = (sx - 0.5).max(0.0);
      let fy = (sy - 0.5).max(0.0);
      let x0 = (fx.floor() as usize).min(src.width - 1);
      let y0 = (fy.floor() as usize).min(src.height - 1);
      let x1 = (x0 + 1).min(src.width - 1);
      let y1 = (y0 + 1).min(src.height - 1);
      let wx = fx - x0 as f32;
      let wy = fy - y0 as f32;

      for c in 0..3 {
        let top = src.pixel(x0, y0, c) * (1.0 - wx) + src.pixel(x1, y0, c) * wx;
        let bottom = src.pixel(x0, y1, c) * (1.0 - wx) + src.pixel(x1, y1, c) * wx;
        let value = top * (1.0 - wy) + bottom * wy;
        out[idx + c] = value.round().clamp(0.0, 255.0) as u8;
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transform::{Rotation, build_transform};

  #[test]
  fn identity_transform_copies_pixels() {
    let data: Vec<u8> = (0..4 * 4 * 3).map(|v| v as u8).collect();
    let src = SourceView {
      data: &data,
      width: 4,
      height: 4,
      channels: 3,
    };
    let mut dst = ModelInput::with_side(4);
    let t = build_transform(4, 4, 4, Rotation::Deg0, true);
    warp_affine_into(&src, &t, &mut dst).unwrap();
    assert_eq!(dst.as_nhwc(), &data[..]);
  }

  #[test]
  fn letterbox_area_is_black() {
    let data = vec![200u8; 8 * 4 * 4];
    let src = SourceView {
      data: &data,
      width: 8,
      height: 4,
      channels: 4,
    };
    let mut dst = ModelInput::with_side(4);
    let t = build_transform(8, 4, 4, Rotation::Deg0, true);
    warp_affine_into(&src, &t, &mut dst).unwrap();
    let rows: Vec<&[u8]> = dst.as_nhwc().chunks(4 * 3).collect();
    assert!(rows[0].iter().all(|&v| v == 0));
    assert!(rows[1].iter().all(|&v| v == 200));
    assert!(rows[2].iter().all(|&v| v == 200));
    assert!(rows[3].iter().all(|&v| v == 0));
  }

  #[test]
  fn upscaling_keeps_edge_pixels() {
    let data = vec![255u8; 2 * 2 * 3];
    let src = SourceView {
      data: &data,
      width: 2,
      height: 2,
      channels: 3,
    };
    let mut dst = ModelInput::with_side(4);
    let t = build_transform(2, 2, 4, Rotation::Deg0, true);
    warp_affine_into(&src, &t, &mut dst).unwrap();
    assert!(dst.as_nhwc().iter().all(|&v| v == 255));
  }

  #[test]
  fn small_source_fills_letterbox_interior() {
    // 4x2 -> 8: 缩放 2，图像占据第 2..6 行
    let data = vec![90u8; 4 * 2 * 4];
    let src = SourceView {
      data: &data,
      width: 4,
      height: 2,
      channels: 4,
    };
    let mut dst = ModelInput::with_side(8);
    let t = build_transform(4, 2, 8, Rotation::Deg0, true);
    warp_affine_into(&src, &t, &mut dst).unwrap();
    let rows: Vec<&[u8]> = dst.as_nhwc().chunks(8 * 3).collect();
    for (y, row) in rows.iter().enumerate() {
      let expected = if (2..6).contains(&y) { 90 } else { 0 };
      assert!(row.iter().all(|&v| v == expected), "第 {} 行", y);
    }
  }

  #[test]
  fn short_buffer_is_rejected() {
    let data = vec![0u8; 10];
    let src = SourceView {
      data: &data,
      width: 4,
      height: 4,
      channels: 3,
    };
    let mut dst = ModelInput::with_side(4);
    let t = AffineTransform::default();
    assert!(matches!(
      warp_affine_into(&src, &t, &mut dst),
      Err(NormalizeError::BufferSizeMismatch { expected: 48, actual: 10 })
    ));
  }
}
