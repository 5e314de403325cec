// 该文件是 Beifeng （北风） 项目的一部分。
// src/main.rs - 项目主程序
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

use beifeng::{
  FromUrl,
  input::load_tensors,
  model::Yolov5Builder,
  output::OutputWrapper,
  task::{OneShotTask, RepeatShotTask, Task},
  tensor::TensorView,
};

/// Beifeng 后处理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 后处理配置，例如 yolov5:///?conf=0.5&iou=0.5&frame=1920x1080
  #[arg(long, value_name = "MODEL", default_value = "yolov5:///")]
  pub model: Url,
  /// 输出张量，按尺度依次给出，例如 raw:///tmp/out0.dat?shape=1,3,80,80,85
  #[arg(long = "tensor", value_name = "TENSOR", required = true)]
  pub tensors: Vec<Url>,
  /// 结果输出: log:///、json:///path 或 record:///path
  #[arg(long, value_name = "OUTPUT", default_value = "log:///")]
  pub output: Url,
  /// 重复执行次数，用于测量耗时
  #[arg(long, value_name = "COUNT")]
  pub repeat: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("后处理配置: {}", args.model);
  for tensor in &args.tensors {
    info!("输出张量: {}", tensor);
  }
  info!("结果输出: {}", args.output);

  let tensors = load_tensors(&args.tensors)?;
  let views: Vec<TensorView<'_>> = tensors.iter().map(|t| t.view()).collect();

  let model = Yolov5Builder::from_url(&args.model)?.build()?;
  let output = OutputWrapper::from_url(&args.output)?;

  match args.repeat {
    Some(repeat) => RepeatShotTask::default()
      .with_repeat(repeat)
      .run_task(&views, model, output)?,
    None => OneShotTask.run_task(&views, model, output)?,
  }

  Ok(())
}
