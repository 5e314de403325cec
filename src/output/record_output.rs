// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/record_output.rs - 文本记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectResult,
  output::{Render, ensure_parent},
};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 每行一个检测: `名称, 分数, x, y, 宽, 高`
///
/// `record:///tmp/result.txt?record=id` 使用类别编号代替名称。
#[derive(Debug)]
pub struct RecordOutput {
  path: PathBuf,
  label_with_name: bool,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }

    let label_with_name = !uri.query_pairs().any(|(k, v)| k == "record" && v == "id");

    Ok(RecordOutput {
      path: PathBuf::from(uri.path()),
      label_with_name,
    })
  }
}

impl RecordOutput {
  pub fn format(&self, result: &DetectResult) -> String {
    let records: Vec<String> = result
      .items
      .iter()
      .map(|det| {
        let name = if self.label_with_name {
          det.label().to_string()
        } else {
          det.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {}, {}, {}, {}",
          name, det.score, det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height
        )
      })
      .collect();
    records.join("\n")
  }
}

impl Render<DetectResult> for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(&self, result: &DetectResult) -> Result<(), Self::Error> {
    ensure_parent(&self.path)?;
    std::fs::write(&self.path, self.format(result))?;
    warn!("保存检测记录到文件: {}", self.path.display());
    Ok(())
  }
}
