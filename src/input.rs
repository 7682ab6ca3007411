// 该文件是 Qujing （取景） 项目的一部分。
// src/input.rs - 视频帧来源
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

use crate::{FromUrl, frame::Frame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "raw_nv21_input")]
mod raw_nv21;
#[cfg(feature = "raw_nv21_input")]
pub use self::raw_nv21::{RawNv21Input, RawNv21InputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "raw_nv21_input")]
  #[error("NV21 文件输入错误: {0}")]
  RawNv21InputError(#[from] RawNv21InputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的帧来源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "raw_nv21_input")]
  RawNv21(RawNv21Input),
  /// 未启用任何输入时占位，无法构造
  #[cfg(not(any(feature = "read_image_file", feature = "raw_nv21_input")))]
  Unavailable(std::convert::Infallible),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "raw_nv21_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RawNv21Input::SCHEME {
        let input = RawNv21Input::from_url(url)?;
        return Ok(InputWrapper::RawNv21(input));
      }
    }
    #[cfg(not(any(feature = "read_image_file", feature = "raw_nv21_input")))]
    let _ = url;
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "raw_nv21_input")]
      InputWrapper::RawNv21(input) => input.next(),
      #[cfg(not(any(feature = "read_image_file", feature = "raw_nv21_input")))]
      InputWrapper::Unavailable(never) => match *never {},
    }
  }
}
