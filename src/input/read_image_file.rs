// 该文件是 Qujing （取景） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameBuffer},
};

/// 重复帧之间的时间间隔（约 30 帧每秒）
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("参数 {key} 的值 '{value}' 无效")]
  InvalidParameter { key: String, value: String },
}

/// 把一张静态图像作为 RGBA 位图帧输出 `repeat` 次
pub struct ImageFileInput {
  image: RgbaImage,
  repeat: usize,
  emitted: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}'，实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let mut repeat = 1;
    for (key, value) in url.query_pairs() {
      if key == "repeat" {
        repeat = value
          .parse()
          .map_err(|_| ImageFileInputError::InvalidParameter {
            key: key.to_string(),
            value: value.to_string(),
          })?;
      }
    }

    let path = urlencoding::decode(url.path()).map_err(|e| {
      ImageFileInputError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;
    let image = ImageReader::open(path.as_ref())?.decode()?;
    info!(
      "加载图像 {}: {}x{}，重复 {} 次",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(Self::from_image(image.to_rgba8(), repeat))
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbaImage, repeat: usize) -> Self {
    Self {
      image,
      repeat,
      emitted: 0,
    }
  }

  pub fn image(&self) -> &RgbaImage {
    &self.image
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.emitted >= self.repeat {
      return None;
    }
    let timestamp = FRAME_INTERVAL * self.emitted as u32;
    self.emitted += 1;
    Some(Frame::new(FrameBuffer::Rgba(self.image.clone())).with_timestamp(timestamp))
  }
}
