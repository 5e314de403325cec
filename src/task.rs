// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 后处理任务
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

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{model::PostProcess, output::Render, tensor::TensorView};

const WARMUP_RUNS: usize = 2;

pub trait Task<M, O>: Sized {
  type Error;
  fn run_task(self, outputs: &[TensorView<'_>], model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: PostProcess<Output = D, Error = ME>,
  O: Render<D, Error = RE>,
> Task<M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, outputs: &[TensorView<'_>], model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let now = Instant::now();
    let result = model.postprocess(outputs)?;
    let elapsed = now.elapsed();
    info!("后处理完成，耗时: {:.2?}", elapsed);
    output.render_result(&result)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一组张量重复执行后处理，用于测量耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

impl<
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: PostProcess<Output = D, Error = ME>,
  O: Render<D, Error = RE>,
> Task<M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, outputs: &[TensorView<'_>], model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务, 重复 {} 次...", self.repeat);
    let mut times = Vec::with_capacity(self.repeat);
    let mut last = None;
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = model.postprocess(outputs)?;
      let elapsed = now.elapsed();
      info!("({})后处理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      last = Some(result);
    }

    let measured = if times.len() > WARMUP_RUNS {
      &times[WARMUP_RUNS..]
    } else {
      &times[..]
    };
    warn!(
      "平均后处理时间: {:.2?}",
      measured.iter().sum::<Duration>() / measured.len() as u32
    );

    if let Some(result) = last {
      output.render_result(&result)?;
    }

    Ok(())
  }
}
