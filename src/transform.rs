// 该文件是 Qujing （取景） 项目的一部分。
// src/transform.rs - 源帧与模型输入之间的仿射变换
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

//! # 仿射变换
//!
//! 源帧坐标（任意尺寸）到模型输入坐标（固定 S×S 正方形）的正向映射及其逆映射。
//!
//! 正向映射的组合顺序（点从右往左依次经过）：
//!
//! ```text
//! T(S/2, S/2) · Scale · Rotate · T(-w/2, -h/2)
//! ```
//!
//! 即先把图像中心移到原点，再旋转，再缩放，最后移到目标正方形中心。

use tracing::debug;

/// 仿射变换矩阵 (2x3)
///
/// ```text
/// | a11 a12 b1 |
/// | a21 a22 b2 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
  pub a11: f32,
  pub a12: f32,
  pub b1: f32,
  pub a21: f32,
  pub a22: f32,
  pub b2: f32,
}

impl Default for AffineMatrix {
  fn default() -> Self {
    Self::identity()
  }
}

impl AffineMatrix {
  pub const fn identity() -> Self {
    Self {
      a11: 1.0,
      a12: 0.0,
      b1: 0.0,
      a21: 0.0,
      a22: 1.0,
      b2: 0.0,
    }
  }

  pub const fn translation(dx: f32, dy: f32) -> Self {
    Self {
      a11: 1.0,
      a12: 0.0,
      b1: dx,
      a21: 0.0,
      a22: 1.0,
      b2: dy,
    }
  }

  pub const fn scale(sx: f32, sy: f32) -> Self {
    Self {
      a11: sx,
      a12: 0.0,
      b1: 0.0,
      a21: 0.0,
      a22: sy,
      b2: 0.0,
    }
  }

  /// 上下翻转：y -> height - y
  pub const fn vertical_flip(height: f32) -> Self {
    Self {
      a11: 1.0,
      a12: 0.0,
      b1: 0.0,
      a21: 0.0,
      a22: -1.0,
      b2: height,
    }
  }

  /// 应用变换到点 (x, y)
  pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      self.a11 * x + self.a12 * y + self.b1,
      self.a21 * x + self.a22 * y + self.b2,
    )
  }

  /// 矩阵组合 (self * other)，结果先应用 other 再应用 self
  pub fn compose(&self, other: &Self) -> Self {
    Self {
      a11: self.a11 * other.a11 + self.a12 * other.a21,
      a12: self.a11 * other.a12 + self.a12 * other.a22,
      b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
      a21: self.a21 * other.a11 + self.a22 * other.a21,
      a22: self.a21 * other.a12 + self.a22 * other.a22,
      b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
    }
  }

  /// 计算逆矩阵，不可逆时返回 None
  pub fn inverse(&self) -> Option<Self> {
    let det = self.a11 * self.a22 - self.a12 * self.a21;
    if det.abs() < f32::EPSILON {
      return None;
    }

    let inv_det = 1.0 / det;
    Some(Self {
      a11: self.a22 * inv_det,
      a12: -self.a12 * inv_det,
      b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
      a21: -self.a21 * inv_det,
      a22: self.a11 * inv_det,
      b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
    })
  }

  /// 将矩形的四个角映射后取外接矩形
  ///
  /// 旋转后矩形不一定仍与坐标轴对齐，所以不能只映射左上和右下两个角。
  pub fn map_rect(&self, rect: &RectF) -> RectF {
    let corners = [
      self.transform_point(rect.left, rect.top),
      self.transform_point(rect.right, rect.top),
      self.transform_point(rect.left, rect.bottom),
      self.transform_point(rect.right, rect.bottom),
    ];

    let mut mapped = RectF {
      left: f32::INFINITY,
      top: f32::INFINITY,
      right: f32::NEG_INFINITY,
      bottom: f32::NEG_INFINITY,
    };
    for (x, y) in corners {
      mapped.left = mapped.left.min(x);
      mapped.top = mapped.top.min(y);
      mapped.right = mapped.right.max(x);
      mapped.bottom = mapped.bottom.max(y);
    }
    mapped
  }
}

/// 浮点矩形 [left, top, right, bottom]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl RectF {
  pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn from_bbox(bbox: &[f32; 4]) -> Self {
    Self::new(bbox[0], bbox[1], bbox[2], bbox[3])
  }

  /// 面积为零（或负）即为空
  pub fn is_empty(&self) -> bool {
    !(self.left < self.right && self.top < self.bottom)
  }

  /// 合并另一个矩形；空矩形不参与合并
  pub fn union(&mut self, other: &RectF) {
    if other.is_empty() {
      return;
    }
    if self.is_empty() {
      *self = *other;
      return;
    }
    self.left = self.left.min(other.left);
    self.top = self.top.min(other.top);
    self.right = self.right.max(other.right);
    self.bottom = self.bottom.max(other.bottom);
  }
}

/// 帧旋转角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  /// 由角度构造，非 90 的整数倍时返回 None
  pub fn from_degrees(degrees: i32) -> Option<Self> {
    match degrees.rem_euclid(360) {
      0 => Some(Rotation::Deg0),
      90 => Some(Rotation::Deg90),
      180 => Some(Rotation::Deg180),
      270 => Some(Rotation::Deg270),
      _ => None,
    }
  }

  pub fn degrees(self) -> i32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 旋转后宽高是否互换
  pub fn is_transposed(self) -> bool {
    matches!(self, Rotation::Deg90 | Rotation::Deg270)
  }

  /// 绕原点旋转的矩阵，直角旋转使用精确的 0/±1 系数
  pub fn matrix(self) -> AffineMatrix {
    let (cos, sin) = match self {
      Rotation::Deg0 => (1.0, 0.0),
      Rotation::Deg90 => (0.0, 1.0),
      Rotation::Deg180 => (-1.0, 0.0),
      Rotation::Deg270 => (0.0, -1.0),
    };
    AffineMatrix {
      a11: cos,
      a12: -sin,
      b1: 0.0,
      a21: sin,
      a22: cos,
      b2: 0.0,
    }
  }
}

/// 正向变换及预先计算的逆变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
  forward: AffineMatrix,
  inverse: AffineMatrix,
}

impl Default for AffineTransform {
  fn default() -> Self {
    Self {
      forward: AffineMatrix::identity(),
      inverse: AffineMatrix::identity(),
    }
  }
}

impl AffineTransform {
  /// 由正向矩阵构造，不可逆时退化为恒等变换
  pub fn from_forward(forward: AffineMatrix) -> Self {
    match forward.inverse() {
      Some(inverse) => Self { forward, inverse },
      None => Self::default(),
    }
  }

  /// 源帧坐标 -> 模型输入坐标
  pub fn forward(&self) -> &AffineMatrix {
    &self.forward
  }

  /// 模型输入坐标 -> 源帧坐标
  pub fn inverse(&self) -> &AffineMatrix {
    &self.inverse
  }

  /// 在当前变换之前先应用 `pre`（例如渲染器的翻转修正）
  pub fn pre_concat(&self, pre: &AffineMatrix) -> Self {
    Self::from_forward(self.forward.compose(pre))
  }
}

/// 计算源帧到 `target_side`×`target_side` 正方形的仿射变换
///
/// `maintain_aspect` 为真时使用统一缩放（两个方向比例取较小者），图像居中，
/// 不产生形变；为假时两个方向独立缩放，填满整个正方形。
///
/// 宽或高为零时返回恒等变换，后续裁剪会把结果收缩为空矩形。
pub fn build_transform(
  source_width: u32,
  source_height: u32,
  target_side: u32,
  rotation: Rotation,
  maintain_aspect: bool,
) -> AffineTransform {
  if source_width == 0 || source_height == 0 || target_side == 0 {
    debug!(
      "退化尺寸 {}x{} -> {}，使用恒等变换",
      source_width, source_height, target_side
    );
    return AffineTransform::default();
  }

  let (in_width, in_height) = if rotation.is_transposed() {
    (source_height as f32, source_width as f32)
  } else {
    (source_width as f32, source_height as f32)
  };
  let side = target_side as f32;

  let (scale_x, scale_y) = {
    let sx = side / in_width;
    let sy = side / in_height;
    if maintain_aspect {
      let s = sx.min(sy);
      (s, s)
    } else {
      (sx, sy)
    }
  };

  let to_origin =
    AffineMatrix::translation(-(source_width as f32) / 2.0, -(source_height as f32) / 2.0);
  let to_target = AffineMatrix::translation(side / 2.0, side / 2.0);

  let forward = to_target
    .compose(&AffineMatrix::scale(scale_x, scale_y))
    .compose(&rotation.matrix())
    .compose(&to_origin);

  AffineTransform::from_forward(forward)
}

/// 以 (宽, 高, 旋转) 为键缓存变换，三者之一变化时才重建
#[derive(Debug, Default)]
pub struct TransformCache {
  key: Option<(u32, u32, Rotation)>,
  transform: AffineTransform,
}

impl TransformCache {
  pub fn get_or_build(
    &mut self,
    width: u32,
    height: u32,
    rotation: Rotation,
    build: impl FnOnce() -> AffineTransform,
  ) -> &AffineTransform {
    if self.key != Some((width, height, rotation)) {
      debug!(
        "帧尺寸或旋转变化: {:?} -> {}x{} {}°，重建变换",
        self.key,
        width,
        height,
        rotation.degrees()
      );
      self.transform = build();
      self.key = Some((width, height, rotation));
    }
    &self.transform
  }

  /// 最近一次构建所用的尺寸
  pub fn last_size(&self) -> Option<(u32, u32)> {
    self.key.map(|(w, h, _)| (w, h))
  }
}
