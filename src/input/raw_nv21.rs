// 该文件是 Qujing （取景） 项目的一部分。
// src/input/raw_nv21.rs - 原始 NV21 文件输入
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

use std::{
  fs::File,
  io::{BufReader, ErrorKind, Read},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameBuffer, Nv21Buffer},
};

const DEFAULT_FPS: u32 = 30;

#[derive(Error, Debug)]
pub enum RawNv21InputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少参数 {0}")]
  MissingParameter(&'static str),
  #[error("参数 {key} 的值 '{value}' 无效")]
  InvalidParameter { key: String, value: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 从文件中依次读取固定尺寸的 NV21 帧，模拟相机预览回调
pub struct RawNv21Input {
  reader: Box<dyn Read + Send>,
  width: u32,
  height: u32,
  frame_interval: Duration,
  index: u32,
}

impl FromUrlWithScheme for RawNv21Input {
  const SCHEME: &'static str = "nv21";
}

fn parse_param(key: &str, value: &str) -> Result<u32, RawNv21InputError> {
  value
    .parse()
    .ok()
    .filter(|&v| v > 0)
    .ok_or_else(|| RawNv21InputError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    })
}

impl FromUrl for RawNv21Input {
  type Error = RawNv21InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}'，实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RawNv21InputError::SchemeMismatch);
    }

    let (mut width, mut height, mut fps) = (None, None, DEFAULT_FPS);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => width = Some(parse_param(&key, &value)?),
        "height" => height = Some(parse_param(&key, &value)?),
        "fps" => fps = parse_param(&key, &value)?,
        _ => {}
      }
    }
    let width = width.ok_or(RawNv21InputError::MissingParameter("width"))?;
    let height = height.ok_or(RawNv21InputError::MissingParameter("height"))?;

    let path = urlencoding::decode(url.path())
      .map_err(|e| RawNv21InputError::IoError(std::io::Error::new(ErrorKind::InvalidInput, e)))?;
    let file = File::open(path.as_ref())?;
    info!("读取 NV21 文件 {}: {}x{} @ {} fps", path, width, height, fps);

    Ok(Self::from_reader(BufReader::new(file), width, height).with_fps(fps))
  }
}

impl RawNv21Input {
  pub fn from_reader(reader: impl Read + Send + 'static, width: u32, height: u32) -> Self {
    Self {
      reader: Box::new(reader),
      width,
      height,
      frame_interval: Duration::from_secs(1) / DEFAULT_FPS,
      index: 0,
    }
  }

  pub fn with_fps(mut self, fps: u32) -> Self {
    self.frame_interval = Duration::from_secs(1) / fps.max(1);
    self
  }
}

impl Iterator for RawNv21Input {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let mut data = vec![0u8; Nv21Buffer::expected_len(self.width, self.height)];
    match self.reader.read_exact(&mut data) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        debug!("NV21 文件读取完毕，共 {} 帧", self.index);
        return None;
      }
      Err(e) => {
        error!("读取 NV21 帧失败: {}", e);
        return None;
      }
    }

    let buffer = Nv21Buffer::new(self.width, self.height, data)?;
    let timestamp = self.frame_interval * self.index;
    self.index += 1;
    Some(Frame::new(FrameBuffer::Nv21(buffer)).with_timestamp(timestamp))
  }
}
