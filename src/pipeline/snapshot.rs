// 该文件是 Qujing （取景） 项目的一部分。
// src/pipeline/snapshot.rs - 调试快照
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

use std::path::{Path, PathBuf};

use chrono::{Datelike, Local};
use image::{Rgb, RgbImage, imageops};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;

use crate::{
  aggregate::InterestRect,
  frame::{ModelInput, ToRgbImage},
  model::DetectItem,
};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 已保存的快照文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFiles {
  pub input: PathBuf,
  pub detected: Option<PathBuf>,
}

/// 快照按日期分目录：`dir/YYYY/MM/DD/HH-MM-SS-XXXX-*.png`
fn snapshot_stem(dir: &Path, sequence: u64) -> Result<(PathBuf, String), SnapshotError> {
  let now = Local::now();
  let directory = dir
    .join(now.year().to_string())
    .join(format!("{:02}", now.month()))
    .join(format!("{:02}", now.day()));
  std::fs::create_dir_all(&directory)?;
  Ok((directory, format!("{}-{:04X}", now.format("%H-%M-%S"), sequence)))
}

fn draw_box(image: &mut RgbImage, bbox: &[f32; 4]) {
  let (w, h) = (image.width() as i32, image.height() as i32);
  let x0 = (bbox[0].floor() as i32).clamp(0, w - 1);
  let y0 = (bbox[1].floor() as i32).clamp(0, h - 1);
  let x1 = (bbox[2].ceil() as i32).clamp(0, w - 1);
  let y1 = (bbox[3].ceil() as i32).clamp(0, h - 1);
  if x0 >= x1 || y0 >= y1 {
    return;
  }
  let rect = Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32);
  draw_hollow_rect_mut(image, rect, BOX_COLOR);
}

/// 保存模型输入（画出符合条件的检测框），有源图像且找到区域时另存裁剪结果
pub fn save_snapshot(
  dir: &Path,
  sequence: u64,
  input: &ModelInput,
  boxes: &[&DetectItem],
  source: Option<&RgbImage>,
  rect: InterestRect,
) -> Result<SnapshotFiles, SnapshotError> {
  let (directory, stem) = snapshot_stem(dir, sequence)?;

  let mut drawn = input.to_rgb_image();
  for item in boxes {
    draw_box(&mut drawn, &item.bbox);
  }
  let input_path = directory.join(format!("{stem}-input.png"));
  drawn.save(&input_path)?;

  let detected = match source {
    Some(source) if !rect.is_empty() => {
      let crop = imageops::crop_imm(
        source,
        rect.left as u32,
        rect.top as u32,
        rect.width() as u32,
        rect.height() as u32,
      )
      .to_image();
      let path = directory.join(format!("{stem}-detected.png"));
      crop.save(&path)?;
      Some(path)
    }
    _ => None,
  };

  Ok(SnapshotFiles {
    input: input_path,
    detected,
  })
}
