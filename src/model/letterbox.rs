// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/letterbox.rs - 信箱变换的逆映射
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::debug;

use crate::model::{CandidateBox, Detection, Rect};

pub const DEFAULT_FRAME_WIDTH: u32 = 1920;
pub const DEFAULT_FRAME_HEIGHT: u32 = 1080;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LetterboxError {
  #[error("尺寸无效: {width}x{height}")]
  InvalidSize { width: u32, height: u32 },
  #[error("缩放比例无效: {0}")]
  InvalidRatio(f32),
}

/// 保持宽高比的缩放加填充参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
  source_width: u32,
  source_height: u32,
  target_width: u32,
  target_height: u32,
  pad_x: i32,
  pad_y: i32,
  ratio: f32,
}

fn check_size(width: u32, height: u32) -> Result<(), LetterboxError> {
  let limit = i32::MAX as u32;
  if width == 0 || height == 0 || width > limit || height > limit {
    return Err(LetterboxError::InvalidSize { width, height });
  }
  Ok(())
}

impl LetterboxParams {
  /// 由帧尺寸和网络输入尺寸推导缩放比例，较短的一边居中填充
  pub fn fit(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, LetterboxError> {
    check_size(source_width, source_height)?;
    check_size(target_width, target_height)?;

    let ratio_w = target_width as f32 / source_width as f32;
    let ratio_h = target_height as f32 / source_height as f32;

    let (ratio, pad_x, pad_y) = if ratio_h > ratio_w {
      let scaled = (source_height as f32 * ratio_w) as i32;
      (ratio_w, 0, (target_height as i32 - scaled) / 2)
    } else {
      let scaled = (source_width as f32 * ratio_h) as i32;
      (ratio_h, (target_width as i32 - scaled) / 2, 0)
    };

    debug!(
      "信箱变换: {}x{} -> {}x{}, 比例 {}, 填充 ({}, {})",
      source_width, source_height, target_width, target_height, ratio, pad_x, pad_y
    );

    Ok(Self {
      source_width,
      source_height,
      target_width,
      target_height,
      pad_x,
      pad_y,
      ratio,
    })
  }

  /// 使用外部给定的参数
  pub fn new(
    (source_width, source_height): (u32, u32),
    (target_width, target_height): (u32, u32),
    (pad_x, pad_y): (i32, i32),
    ratio: f32,
  ) -> Result<Self, LetterboxError> {
    check_size(source_width, source_height)?;
    check_size(target_width, target_height)?;
    if !ratio.is_finite() || ratio <= 0.0 {
      return Err(LetterboxError::InvalidRatio(ratio));
    }
    Ok(Self {
      source_width,
      source_height,
      target_width,
      target_height,
      pad_x,
      pad_y,
      ratio,
    })
  }

  pub fn source_size(&self) -> (u32, u32) {
    (self.source_width, self.source_height)
  }

  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  pub fn padding(&self) -> (i32, i32) {
    (self.pad_x, self.pad_y)
  }

  pub fn ratio(&self) -> f32 {
    self.ratio
  }

  /// 将候选框映射回原始帧并裁剪到帧内
  ///
  /// `class_offset` 为解码时使用的 `max_wh`，会先从坐标中移除。
  pub fn remap(&self, candidate: &CandidateBox, class_offset: Option<i32>) -> Detection {
    let offset = class_offset.map_or(0, |max_wh| i64::from(candidate.class_id) * i64::from(max_wh));
    let frame_w = i64::from(self.source_width);
    let frame_h = i64::from(self.source_height);

    let x = self
      .unscale(i64::from(candidate.x) - offset - i64::from(self.pad_x))
      .clamp(0, frame_w);
    let y = self
      .unscale(i64::from(candidate.y) - offset - i64::from(self.pad_y))
      .clamp(0, frame_h);

    // x + w >= frame 时截到帧边缘
    let width = self.unscale(i64::from(candidate.width)).clamp(0, frame_w - x);
    let height = self.unscale(i64::from(candidate.height)).clamp(0, frame_h - y);

    // 均已裁剪到 [0, frame]，而帧尺寸不超过 i32::MAX
    Detection {
      bbox: Rect::new(x as i32, y as i32, width as i32, height as i32),
      score: candidate.score,
      class_id: candidate.class_id,
    }
  }

  fn unscale(&self, value: i64) -> i64 {
    (value as f32 / self.ratio) as i64
  }
}
