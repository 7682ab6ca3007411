// 该文件是 Qujing （取景） 项目的一部分。
// src/aggregate.rs - 检测结果聚合为源帧中的兴趣区域
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

use std::fmt;

use tracing::debug;

use crate::{
  model::DetectItem,
  transform::{AffineMatrix, RectF},
};

/// 源帧坐标中的整数矩形，已裁剪到帧范围内
///
/// 面积为零表示没有符合条件的检测。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InterestRect {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

impl InterestRect {
  pub const EMPTY: InterestRect = InterestRect {
    left: 0,
    top: 0,
    right: 0,
    bottom: 0,
  };

  pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.left >= self.right || self.top >= self.bottom
  }

  pub fn width(&self) -> i32 {
    (self.right - self.left).max(0)
  }

  pub fn height(&self) -> i32 {
    (self.bottom - self.top).max(0)
  }
}

impl fmt::Display for InterestRect {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}, {}, {}, {}] ({}x{})",
      self.left,
      self.top,
      self.right,
      self.bottom,
      self.width(),
      self.height()
    )
  }
}

/// 置信度不低于阈值且标签匹配的检测项
pub fn qualifying<'a>(
  detections: &'a [DetectItem],
  confidence_threshold: f32,
  target_label: &'a str,
) -> impl Iterator<Item = &'a DetectItem> + 'a {
  detections
    .iter()
    .filter(move |item| item.score >= confidence_threshold && item.label == target_label)
}

/// 过滤、合并检测框，逆映射回源帧并裁剪
pub fn aggregate(
  detections: &[DetectItem],
  confidence_threshold: f32,
  target_label: &str,
  inverse: &AffineMatrix,
  source_width: u32,
  source_height: u32,
) -> InterestRect {
  let mut union = RectF::default();
  for item in qualifying(detections, confidence_threshold, target_label) {
    debug!("检测到 {}，置信度 {:.2}，位置 {:?}", item.label, item.score, item.bbox);
    union.union(&RectF::from_bbox(&item.bbox));
  }

  if union.is_empty() {
    return InterestRect::EMPTY;
  }

  let mapped = inverse.map_rect(&union);
  let max_x = i32::try_from(source_width).unwrap_or(i32::MAX);
  let max_y = i32::try_from(source_height).unwrap_or(i32::MAX);
  let round = |v: f32| (v + 0.5).floor() as i32;

  let rect = InterestRect {
    left: round(mapped.left).clamp(0, max_x),
    top: round(mapped.top).clamp(0, max_y),
    right: round(mapped.right).clamp(0, max_x),
    bottom: round(mapped.bottom).clamp(0, max_y),
  };
  debug!("兴趣区域: {}", rect);
  rect
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transform::{Rotation, build_transform};
  use proptest::prelude::*;

  const THRESHOLD: f32 = 0.6;
  const PERSON: &str = "person";

  fn person(score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem::new(PERSON, score, bbox)
  }

  #[test]
  fn overlapping_people_are_unioned() {
    let detections = [
      person(0.7, [10.0, 10.0, 50.0, 50.0]),
      person(0.9, [30.0, 30.0, 80.0, 80.0]),
    ];
    let t = build_transform(300, 300, 300, Rotation::Deg0, true);
    let rect = aggregate(&detections, THRESHOLD, PERSON, t.inverse(), 300, 300);
    assert_eq!(rect, InterestRect::new(10, 10, 80, 80));
  }

  #[test]
  fn threshold_is_inclusive() {
    let identity = AffineMatrix::identity();
    let below = [person(0.59, [10.0, 10.0, 50.0, 50.0])];
    assert!(aggregate(&below, THRESHOLD, PERSON, &identity, 300, 300).is_empty());

    let exact = [person(0.6, [10.0, 10.0, 50.0, 50.0])];
    assert_eq!(
      aggregate(&exact, THRESHOLD, PERSON, &identity, 300, 300),
      InterestRect::new(10, 10, 50, 50)
    );
  }

  #[test]
  fn other_labels_are_ignored() {
    let detections = [
      DetectItem::new("dog", 0.99, [0.0, 0.0, 300.0, 300.0]),
      person(0.8, [100.0, 120.0, 140.0, 200.0]),
    ];
    let rect = aggregate(&detections, THRESHOLD, PERSON, &AffineMatrix::identity(), 300, 300);
    assert_eq!(rect, InterestRect::new(100, 120, 140, 200));
  }

  #[test]
  fn no_detection_gives_empty_rect() {
    let rect = aggregate(&[], THRESHOLD, PERSON, &AffineMatrix::identity(), 640, 480);
    assert_eq!(rect, InterestRect::EMPTY);
    assert_eq!(rect.width(), 0);
  }

  #[test]
  fn mapped_box_is_clamped_to_frame() {
    let identity = AffineMatrix::identity();
    let detections = [person(0.9, [-3.0, 5.0, 302.4, 299.0])];
    let rect = aggregate(&detections, THRESHOLD, PERSON, &identity, 300, 300);
    assert_eq!(rect, InterestRect::new(0, 5, 300, 299));
  }

  #[test]
  fn oversized_frame_does_not_wrap_bounds() {
    let detections = [person(0.9, [10.0, 10.0, 50.0, 50.0])];
    let rect = aggregate(&detections, THRESHOLD, PERSON, &AffineMatrix::identity(), u32::MAX, 300);
    assert_eq!(rect, InterestRect::new(10, 10, 50, 50));
  }

  #[test]
  fn maps_back_through_letterbox() {
    // 600x300 -> 300: 缩放 0.5，纵向偏移 75
    let t = build_transform(600, 300, 300, Rotation::Deg0, true);
    let detections = [person(0.9, [50.0, 100.0, 150.0, 200.0])];
    let rect = aggregate(&detections, THRESHOLD, PERSON, t.inverse(), 600, 300);
    assert_eq!(rect, InterestRect::new(100, 50, 300, 250));
  }

  #[test]
  fn rotated_box_uses_all_four_corners() {
    // 400x200 旋转 90° 后为 200x400，缩放 0.5 后水平居中于 [50, 150]
    let t = build_transform(400, 200, 200, Rotation::Deg90, true);
    let detections = [person(0.9, [50.0, 0.0, 150.0, 200.0])];
    let rect = aggregate(&detections, THRESHOLD, PERSON, t.inverse(), 400, 200);
    assert_eq!(rect, InterestRect::new(0, 0, 400, 200));
  }

  fn arb_detection() -> impl Strategy<Value = DetectItem> {
    (
      prop_oneof![Just("person"), Just("cat")],
      0.0f32..1.0,
      0.0f32..250.0,
      0.0f32..250.0,
      1.0f32..50.0,
      1.0f32..50.0,
    )
      .prop_map(|(label, score, x, y, w, h)| DetectItem::new(label, score, [x, y, x + w, y + h]))
  }

  proptest! {
    #[test]
    fn order_does_not_matter(
      detections in prop::collection::vec(arb_detection(), 0..12),
      seed in any::<u64>(),
    ) {
      let t = build_transform(640, 480, 300, Rotation::Deg0, true);
      let expected = aggregate(&detections, THRESHOLD, PERSON, t.inverse(), 640, 480);

      let mut shuffled = detections.clone();
      shuffled.reverse();
      if !shuffled.is_empty() {
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
      }
      let actual = aggregate(&shuffled, THRESHOLD, PERSON, t.inverse(), 640, 480);
      prop_assert_eq!(expected, actual);
    }

    #[test]
    fn result_stays_inside_frame(
      detections in prop::collection::vec(arb_detection(), 0..8),
      width in 1u32..2000,
      height in 1u32..2000,
    ) {
      let t = build_transform(width, height, 300, Rotation::Deg0, true);
      let rect = aggregate(&detections, THRESHOLD, PERSON, t.inverse(), width, height);
      prop_assert!(rect.left >= 0 && rect.top >= 0);
      prop_assert!(rect.right <= width as i32 && rect.bottom <= height as i32);
    }
  }
}
