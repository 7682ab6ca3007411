// 该文件是 Qujing （取景） 项目的一部分。
// src/model/replay.rs - 回放录制的检测结果
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

//! 回放模型：按顺序循环返回 JSON 文件中录制的检测结果。
//!
//! 文件格式为帧的数组，每帧是检测项的数组：
//!
//! ```json
//! [
//!   [{"label": "person", "confidence": 0.9, "bbox": [10, 10, 50, 50]}],
//!   []
//! ]
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ModelInput,
  model::{DetectItem, DetectResult, Model},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("录制格式错误: {0}")]
  InvalidRecord(String),
  #[error("录制内容为空")]
  Empty,
}

pub struct ReplayModel {
  frames: Box<[DetectResult]>,
  cursor: AtomicUsize,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ReplayModelError::InvalidRecord(e.to_string()))?;
    info!("加载检测录制文件: {}", path);
    let text = std::fs::read_to_string(path.as_ref())?;
    Self::from_json(&text)
  }
}

impl ReplayModel {
  pub fn from_frames(frames: Vec<DetectResult>) -> Result<Self, ReplayModelError> {
    if frames.is_empty() {
      return Err(ReplayModelError::Empty);
    }
    Ok(Self {
      frames: frames.into_boxed_slice(),
      cursor: AtomicUsize::new(0),
    })
  }

  pub fn from_json(text: &str) -> Result<Self, ReplayModelError> {
    let root: Value = serde_json::from_str(text)?;
    let frames = root
      .as_array()
      .ok_or_else(|| ReplayModelError::InvalidRecord("顶层必须是数组".to_string()))?
      .iter()
      .enumerate()
      .map(|(index, frame)| parse_frame(index, frame))
      .collect::<Result<Vec<_>, _>>()?;

    debug!("录制帧数: {}", frames.len());
    Self::from_frames(frames)
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

fn parse_frame(index: usize, frame: &Value) -> Result<DetectResult, ReplayModelError> {
  let items = frame
    .as_array()
    .ok_or_else(|| ReplayModelError::InvalidRecord(format!("第 {} 帧不是数组", index)))?;

  items
    .iter()
    .map(|item| parse_item(index, item))
    .collect::<Result<Vec<_>, _>>()
    .map(DetectResult::from)
}

fn parse_item(index: usize, item: &Value) -> Result<DetectItem, ReplayModelError> {
  let invalid = |what: &str| ReplayModelError::InvalidRecord(format!("第 {} 帧: {}", index, what));

  let label = item
    .get("label")
    .and_then(Value::as_str)
    .ok_or_else(|| invalid("缺少 label"))?;
  let score = item
    .get("confidence")
    .and_then(Value::as_f64)
    .ok_or_else(|| invalid("缺少 confidence"))? as f32;
  let bbox = item
    .get("bbox")
    .and_then(Value::as_array)
    .filter(|values| values.len() == 4)
    .ok_or_else(|| invalid("bbox 必须是 4 个数"))?;

  let mut coords = [0.0f32; 4];
  for (slot, value) in coords.iter_mut().zip(bbox) {
    *slot = value.as_f64().ok_or_else(|| invalid("bbox 必须是数值"))? as f32;
  }

  Ok(DetectItem::new(label, score, coords))
}

impl Model for ReplayModel {
  type Error = ReplayModelError;

  fn infer(&self, _input: &ModelInput) -> Result<DetectResult, Self::Error> {
    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
    Ok(self.frames[index].clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn replays_frames_in_a_cycle() {
    let model = ReplayModel::from_json(
      r#"[
        [{"label": "person", "confidence": 0.9, "bbox": [10, 10, 50, 50]}],
        []
      ]"#,
    )
    .unwrap();
    let input = ModelInput::with_side(4);

    let first = model.infer(&input).unwrap();
    assert_eq!(first.items[0], DetectItem::new("person", 0.9, [10.0, 10.0, 50.0, 50.0]));
    assert!(model.infer(&input).unwrap().is_empty());
    assert_eq!(model.infer(&input).unwrap(), first);
  }

  #[test]
  fn rejects_malformed_records() {
    assert!(matches!(
      ReplayModel::from_json("{}"),
      Err(ReplayModelError::InvalidRecord(_))
    ));
    assert!(matches!(
      ReplayModel::from_json(r#"[[{"label": "person", "confidence": 0.9, "bbox": [1, 2]}]]"#),
      Err(ReplayModelError::InvalidRecord(_))
    ));
    assert!(matches!(ReplayModel::from_json("[]"), Err(ReplayModelError::Empty)));
  }

  #[test]
  fn loads_from_url() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"[[]]").unwrap();
    let url = Url::from_file_path(file.path()).unwrap();
    let url = Url::parse(&format!("replay://{}", url.path())).unwrap();
    let model = ReplayModel::from_url(&url).unwrap();
    assert_eq!(model.len(), 1);
  }
}
