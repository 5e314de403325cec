// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/raw_tensor.rs - 原始张量转储文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{HostTensor, TensorError, TensorType},
};

#[derive(Error, Debug)]
pub enum RawTensorInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {key} 的值无效: {value}")]
  InvalidQuery { key: String, value: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
}

/// 小端序的原始张量转储，例如 `raw:///tmp/output0.dat?shape=1,3,80,80,85`
///
/// 未给出 `shape` 时按一维张量读取；`dtype` 默认为 f32，量化类型使用
/// `scale` 反量化。
#[derive(Debug, Clone)]
pub struct RawTensorInput {
  path: PathBuf,
  dims: Option<Vec<usize>>,
  dtype: TensorType,
  scale: f32,
}

impl FromUrlWithScheme for RawTensorInput {
  const SCHEME: &'static str = "raw";
}

fn invalid(key: &str, value: &str) -> RawTensorInputError {
  RawTensorInputError::InvalidQuery {
    key: key.to_string(),
    value: value.to_string(),
  }
}

impl FromUrl for RawTensorInput {
  type Error = RawTensorInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RawTensorInputError::SchemeMismatch);
    }

    let mut input = RawTensorInput {
      path: PathBuf::from(url.path()),
      dims: None,
      dtype: TensorType::Float32,
      scale: 1.0,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "shape" => {
          let dims = value
            .split(',')
            .map(|d| d.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid(&key, &value))?;
          input.dims = Some(dims);
        }
        "dtype" => input.dtype = value.parse()?,
        "scale" => input.scale = value.parse().map_err(|_| invalid(&key, &value))?,
        other => debug!("忽略未知参数: {}", other),
      }
    }

    Ok(input)
  }
}

impl RawTensorInput {
  pub fn load(&self) -> Result<HostTensor, RawTensorInputError> {
    info!("读取张量转储: {}", self.path.display());
    let bytes = std::fs::read(&self.path)?;
    debug!("转储文件大小: {} 字节", bytes.len());

    let dims = match &self.dims {
      Some(dims) => dims.clone(),
      None => vec![bytes.len() / self.dtype.size_of()],
    };
    let tensor = HostTensor::from_le_bytes(&bytes, &dims, self.dtype, self.scale)?;
    debug!("张量形状 {}, 类型 {}, 比例 {}", tensor.shape(), self.dtype, self.scale);

    Ok(tensor)
  }
}
