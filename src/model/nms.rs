// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{collections::BTreeMap, str::FromStr};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::model::{CandidateBox, PostProcessError};

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MAX_WH: i32 = 7680;

/// 不同类别之间如何隔离
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsStrategy {
  /// 按类别分组，每组独立抑制
  #[default]
  Partitioned,
  /// 解码时按 `class_id * max_wh` 平移坐标，再做一次全局抑制，重映射前移除偏移
  ClassOffset { max_wh: i32 },
  /// 忽略类别
  Agnostic,
}

impl NmsStrategy {
  /// 解码与重映射需要使用的坐标偏移
  pub fn class_offset(&self) -> Option<i32> {
    match self {
      NmsStrategy::ClassOffset { max_wh } => Some(*max_wh),
      _ => None,
    }
  }
}

impl FromStr for NmsStrategy {
  type Err = PostProcessError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "partition" | "partitioned" => Ok(NmsStrategy::Partitioned),
      "offset" => Ok(NmsStrategy::ClassOffset {
        max_wh: DEFAULT_MAX_WH,
      }),
      "agnostic" => Ok(NmsStrategy::Agnostic),
      other => Err(PostProcessError::Config(format!("未知的 NMS 策略: {}", other))),
    }
  }
}

/// 计算两个框的 IoU，并集为零时返回 0
pub fn iou(a: &CandidateBox, b: &CandidateBox) -> f32 {
  let (ra, rb) = (edges(a), edges(b));
  let left = ra.0.max(rb.0) as f32;
  let top = ra.1.max(rb.1) as f32;
  let right = ra.2.min(rb.2) as f32;
  let bottom = ra.3.min(rb.3) as f32;

  let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
  let union = area(a) + area(b) - overlap;

  if union > 0.0 { overlap / union } else { 0.0 }
}

/// (left, top, right, bottom)，在 i64 中计算避免溢出
fn edges(b: &CandidateBox) -> (i64, i64, i64, i64) {
  let (x, y) = (i64::from(b.x), i64::from(b.y));
  (x, y, x + i64::from(b.width), y + i64::from(b.height))
}

fn area(b: &CandidateBox) -> f32 {
  (i64::from(b.width) * i64::from(b.height)) as f32
}

/// 单次空间抑制
///
/// 按分数升序排列，从分数最高的剩余框开始，删除所有与其 IoU 超过阈值的
/// 低分框。输出保持升序，非有限分数的框直接丢弃。
pub fn nms(mut boxes: Vec<CandidateBox>, threshold: f32) -> Vec<CandidateBox> {
  let before = boxes.len();
  boxes.retain(|b| b.score.is_finite());
  if boxes.len() != before {
    warn!("丢弃 {} 个分数非有限的候选框", before - boxes.len());
  }

  boxes.sort_by(|a, b| a.score.total_cmp(&b.score));

  let mut keep = vec![true; boxes.len()];
  for index in (1..boxes.len()).rev() {
    if !keep[index] {
      continue;
    }
    let reference = boxes[index];
    for (i, candidate) in boxes[..index].iter().enumerate() {
      if keep[i] && iou(&reference, candidate) > threshold {
        keep[i] = false;
      }
    }
  }

  boxes
    .into_iter()
    .zip(keep)
    .filter_map(|(b, kept)| kept.then_some(b))
    .collect()
}

/// 按策略执行类别感知的抑制，结果按分数升序
pub fn class_aware_nms(
  boxes: Vec<CandidateBox>,
  threshold: f32,
  strategy: NmsStrategy,
) -> Vec<CandidateBox> {
  match strategy {
    NmsStrategy::ClassOffset { .. } | NmsStrategy::Agnostic => nms(boxes, threshold),
    NmsStrategy::Partitioned => {
      let mut partitions: BTreeMap<u32, Vec<CandidateBox>> = BTreeMap::new();
      for b in boxes {
        partitions.entry(b.class_id).or_default().push(b);
      }
      debug!("按 {} 个类别分组执行 NMS", partitions.len());

      #[cfg(feature = "rayon")]
      let survivors: Vec<Vec<CandidateBox>> = partitions
        .into_par_iter()
        .map(|(_, part)| nms(part, threshold))
        .collect();
      #[cfg(not(feature = "rayon"))]
      let survivors: Vec<Vec<CandidateBox>> = partitions
        .into_values()
        .map(|part| nms(part, threshold))
        .collect();

      let mut merged: Vec<CandidateBox> = survivors.into_iter().flatten().collect();
      merged.sort_by(|a, b| a.score.total_cmp(&b.score));
      merged
    }
  }
}
