// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/json_output.rs - JSON 文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::PathBuf,
};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectResult,
  output::{Render, ensure_parent},
};

#[derive(Error, Debug)]
pub enum JsonFileOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 将检测结果写为 JSON 数组，例如 `json:///tmp/result.json`
#[derive(Debug)]
pub struct JsonFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonFileOutputError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(JsonFileOutput {
      path: PathBuf::from(uri.path()),
    })
  }
}

pub fn to_json(result: &DetectResult) -> Value {
  let items = result
    .items
    .iter()
    .map(|det| {
      json!({
        "class_id": det.class_id,
        "label": det.label(),
        "score": det.score,
        "bbox": [det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height],
      })
    })
    .collect();
  Value::Array(items)
}

impl Render<DetectResult> for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn render_result(&self, result: &DetectResult) -> Result<(), Self::Error> {
    ensure_parent(&self.path)?;
    let mut writer = BufWriter::new(File::create(&self.path)?);
    serde_json::to_writer_pretty(&mut writer, &to_json(result))?;
    writer.flush()?;
    warn!("保存检测结果到文件: {}", self.path.display());
    Ok(())
  }
}
