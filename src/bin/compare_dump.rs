// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/compare_dump.rs - 比较两个张量转储
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use beifeng::{FromUrl, input::RawTensorInput, tensor::compare};

/// 计算两个转储之间的绝对误差
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 参考转储，例如 raw:///tmp/output_ref_data.dat
  #[arg(long, value_name = "TENSOR")]
  pub reference: Url,
  /// 待比较的转储
  #[arg(long, value_name = "TENSOR")]
  pub actual: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let reference = RawTensorInput::from_url(&args.reference)?.load()?;
  let actual = RawTensorInput::from_url(&args.actual)?.load()?;

  let diff = compare(reference.view().as_slice(), actual.view().as_slice())?;
  info!("误差总和: {}", diff.sum);
  info!("平均误差: {}", diff.mean);

  Ok(())
}
