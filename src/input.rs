// 该文件是 Beifeng （北风） 项目的一部分。
// src/input.rs - 张量输入
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
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, tensor::HostTensor};

mod raw_tensor;
pub use self::raw_tensor::{RawTensorInput, RawTensorInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("原始张量输入错误: {0}")]
  RawTensorInputError(#[from] RawTensorInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  RawTensor(RawTensorInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == RawTensorInput::SCHEME {
      return Ok(InputWrapper::RawTensor(RawTensorInput::from_url(url)?));
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  pub fn load(&self) -> Result<HostTensor, InputError> {
    match self {
      InputWrapper::RawTensor(input) => Ok(input.load()?),
    }
  }
}

/// 按给定顺序加载每个尺度的输出张量
pub fn load_tensors(urls: &[Url]) -> Result<Vec<HostTensor>, InputError> {
  let tensors = urls
    .iter()
    .map(|url| InputWrapper::from_url(url)?.load())
    .collect::<Result<Vec<_>, _>>()?;
  info!("已加载 {} 个输出张量", tensors.len());
  Ok(tensors)
}
