// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/decode.rs - 多尺度网格解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::str::FromStr;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
  model::{AnchorGroup, AnchorTable, PostProcessError},
  tensor::{GridView, TensorView},
};

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// tx, ty, tw, th, objectness
const BOX_CHANNELS: usize = 5;
const OBJECTNESS: usize = 4;

/// 目标置信度的快速预筛选方式，与类别置信度阈值无关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectnessGate {
  /// 在 logit 空间比较 `raw > 0`，即 `sigmoid(raw) > 0.5`
  #[default]
  Logit,
  /// 直接比较未激活的 `raw > 0.5`，与参考程序输出逐位一致
  RawHalf,
}

impl FromStr for ObjectnessGate {
  type Err = PostProcessError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "logit" => Ok(ObjectnessGate::Logit),
      "raw" | "raw-half" => Ok(ObjectnessGate::RawHalf),
      other => Err(PostProcessError::Config(format!(
        "未知的目标置信度预筛选方式: {}",
        other
      ))),
    }
  }
}

/// 网络输入坐标系下的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
  pub score: f32,
  pub class_id: u32,
}

struct Scale<'a> {
  index: usize,
  stride: u32,
  grid: GridView<'a>,
  group: &'a AnchorGroup,
}

/// 将每个尺度的原始输出解码为候选框，置信度过滤在解码过程中完成
#[derive(Debug, Clone, Copy)]
pub struct GridDecoder<'t> {
  anchors: &'t AnchorTable,
  input_width: u32,
  input_height: u32,
  conf_threshold: f32,
  gate: ObjectnessGate,
  class_offset: Option<i32>,
}

impl<'t> GridDecoder<'t> {
  pub fn new(anchors: &'t AnchorTable) -> Self {
    Self {
      anchors,
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      gate: ObjectnessGate::default(),
      class_offset: None,
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn conf_threshold(mut self, threshold: f32) -> Self {
    self.conf_threshold = threshold;
    self
  }

  pub fn gate(mut self, gate: ObjectnessGate) -> Self {
    self.gate = gate;
    self
  }

  /// 为每个框加上 `class_id * max_wh` 的坐标偏移，使单次 NMS 不会合并不同类别
  pub fn class_offset(mut self, max_wh: Option<i32>) -> Self {
    self.class_offset = max_wh;
    self
  }

  /// 解码全部尺度，结果按输出顺序拼接
  pub fn decode(&self, outputs: &[TensorView<'_>]) -> Result<Vec<CandidateBox>, PostProcessError> {
    let scales = self.bind_scales(outputs)?;

    #[cfg(feature = "rayon")]
    let per_scale: Vec<Vec<CandidateBox>> =
      scales.par_iter().map(|scale| self.decode_scale(scale)).collect();
    #[cfg(not(feature = "rayon"))]
    let per_scale: Vec<Vec<CandidateBox>> =
      scales.iter().map(|scale| self.decode_scale(scale)).collect();

    Ok(per_scale.into_iter().flatten().collect())
  }

  /// 校验每个输出张量，并通过步长找到对应的锚框组
  fn bind_scales<'a>(
    &'a self,
    outputs: &[TensorView<'a>],
  ) -> Result<Vec<Scale<'a>>, PostProcessError> {
    if outputs.is_empty() {
      return Err(PostProcessError::NoOutputs);
    }

    let mut scales: Vec<Scale<'a>> = Vec::with_capacity(outputs.len());
    let mut expected_channels = None;

    for (index, output) in outputs.iter().enumerate() {
      debug!("输出 {}: 形状 {}", index, output.shape());
      let grid = output.as_grid()?;

      if grid.batch() != 1 {
        return Err(PostProcessError::UnsupportedBatch {
          index,
          batch: grid.batch(),
        });
      }

      let channels = grid.channels();
      if channels <= BOX_CHANNELS {
        return Err(PostProcessError::TooFewChannels {
          index,
          channels,
          min: BOX_CHANNELS + 1,
        });
      }
      match expected_channels {
        None => expected_channels = Some(channels),
        Some(expected) if expected != channels => {
          return Err(PostProcessError::ChannelMismatch {
            index,
            channels,
            expected,
          });
        }
        Some(_) => {}
      }

      if let Some(max_wh) = self.class_offset {
        self.check_class_offset(index, channels - BOX_CHANNELS, max_wh)?;
      }

      let stride = self.stride_of(index, &grid)?;
      if let Some(previous) = scales.iter().find(|s| s.stride == stride) {
        return Err(PostProcessError::DuplicateScale {
          index,
          stride,
          previous: previous.index,
        });
      }

      let group = self
        .anchors
        .by_stride(stride)
        .ok_or(PostProcessError::NoAnchorGroup { index, stride })?;
      if group.len() != grid.anchors() {
        return Err(PostProcessError::AnchorCountMismatch {
          index,
          stride,
          expected: group.len(),
          actual: grid.anchors(),
        });
      }

      scales.push(Scale {
        index,
        stride,
        grid,
        group,
      });
    }

    Ok(scales)
  }

  /// 偏移后的坐标必须仍能用 i32 表示
  fn check_class_offset(
    &self,
    index: usize,
    classes: usize,
    max_wh: i32,
  ) -> Result<(), PostProcessError> {
    let margin = 2 * i64::from(self.input_width.max(self.input_height));
    let fits = i64::try_from(classes - 1)
      .ok()
      .and_then(|last| last.checked_mul(i64::from(max_wh)))
      .and_then(|offset| offset.checked_add(margin))
      .is_some_and(|extent| max_wh > 0 && extent <= i64::from(i32::MAX));
    if !fits {
      return Err(PostProcessError::ClassOffsetOverflow {
        index,
        classes,
        max_wh,
      });
    }
    Ok(())
  }

  fn stride_of(&self, index: usize, grid: &GridView<'_>) -> Result<u32, PostProcessError> {
    let input_w = self.input_width as usize;
    let input_h = self.input_height as usize;
    let (grid_w, grid_h) = (grid.width(), grid.height());

    if input_w % grid_w != 0 || input_h % grid_h != 0 || input_w / grid_w != input_h / grid_h {
      return Err(PostProcessError::StrideMismatch {
        index,
        grid_width: grid_w,
        grid_height: grid_h,
        input_width: self.input_width,
        input_height: self.input_height,
      });
    }

    Ok((input_w / grid_w) as u32)
  }

  fn decode_scale(&self, scale: &Scale<'_>) -> Vec<CandidateBox> {
    let grid = &scale.grid;
    let gate = match self.gate {
      ObjectnessGate::Logit => 0.0,
      ObjectnessGate::RawHalf => 0.5,
    };
    let grid_w = grid.width() as f64;
    let grid_h = grid.height() as f64;
    let input_w = f64::from(self.input_width);
    let input_h = f64::from(self.input_height);

    let mut boxes = Vec::new();
    let mut nan_cells = 0usize;

    for (anchor_idx, anchor) in scale.group.anchors.iter().enumerate() {
      for (row, col, cell) in grid.anchor_cells(anchor_idx) {
        let raw_obj = cell[OBJECTNESS];
        if raw_obj.is_nan() {
          nan_cells += 1;
          continue;
        }
        if raw_obj <= gate {
          continue;
        }

        let obj = sigmoid(raw_obj);
        let (class_id, class_conf) = argmax(&cell[BOX_CHANNELS..]);
        // sigmoid(class_conf) * obj > t
        let bar = -(obj / self.conf_threshold - 1.0).ln();
        let passes = class_conf > bar;
        if !passes {
          if class_conf.is_nan() {
            nan_cells += 1;
          }
          continue;
        }

        let cx = ((f64::from(sigmoid(cell[0]) * 2.0) - 0.5 + col as f64) / grid_w * input_w) as f32;
        let cy = ((f64::from(sigmoid(cell[1]) * 2.0) - 0.5 + row as f64) / grid_h * input_h) as f32;
        let w = (f64::from(sigmoid(cell[2]) * 2.0).powi(2) * f64::from(anchor.width)) as f32;
        let h = (f64::from(sigmoid(cell[3]) * 2.0).powi(2) * f64::from(anchor.height)) as f32;

        let offset = self
          .class_offset
          .map_or(0.0, |max_wh| (class_id as i32 * max_wh) as f32);

        boxes.push(CandidateBox {
          x: ((cx - w / 2.0 + offset) as i32).max(0),
          y: ((cy - h / 2.0 + offset) as i32).max(0),
          width: w as i32,
          height: h as i32,
          score: sigmoid(class_conf) * obj,
          class_id,
        });
      }
    }

    if nan_cells > 0 {
      warn!("输出 {}: {} 个单元包含 NaN, 已丢弃", scale.index, nan_cells);
    }
    debug!(
      "输出 {} (步长 {}, 网格 {}x{}): 解码得到 {} 个候选框",
      scale.index,
      scale.stride,
      grid.width(),
      grid.height(),
      boxes.len()
    );

    boxes
  }
}

/// 第一个最大值胜出
fn argmax(logits: &[f32]) -> (u32, f32) {
  let Some((&first, rest)) = logits.split_first() else {
    return (0, f32::NAN);
  };
  rest
    .iter()
    .enumerate()
    .fold((0, first), |(best_id, best), (i, &value)| {
      if value > best {
        (i as u32 + 1, value)
      } else {
        (best_id, best)
      }
    })
}

fn sigmoid(x: f32) -> f32 {
  (1.0f64 / f64::from(1.0 + (-x).exp())) as f32
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Anchor;

  fn single_anchor_table(stride: u32) -> AnchorTable {
    AnchorTable::new(vec![AnchorGroup::new(
      stride,
      vec![Anchor::new(100.0, 100.0)],
    )])
  }

  #[test]
  fn confident_single_cell_yields_one_box() {
    let table = single_anchor_table(640);
    let data = [0.0, 0.0, 0.0, 0.0, 12.0, 12.0, -5.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();

    let boxes = GridDecoder::new(&table).decode(&[view]).unwrap();
    assert_eq!(boxes.len(), 1);
    let b = boxes[0];
    assert_eq!(b.class_id, 0);
    assert!(b.score > 0.99 && b.score <= 1.0);
    assert_eq!((b.x, b.y, b.width, b.height), (270, 270, 100, 100));
  }

  #[test]
  fn low_objectness_yields_nothing() {
    let table = single_anchor_table(640);
    let data = [0.0, 0.0, 0.0, 0.0, -3.0, 12.0, -5.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();
    assert!(GridDecoder::new(&table).decode(&[view]).unwrap().is_empty());
  }

  #[test]
  fn gate_forms_differ_between_zero_and_half() {
    let table = single_anchor_table(640);
    let data = [0.0, 0.0, 0.0, 0.0, 0.3, 10.0, -5.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();

    let logit = GridDecoder::new(&table)
      .gate(ObjectnessGate::Logit)
      .decode(std::slice::from_ref(&view))
      .unwrap();
    assert_eq!(logit.len(), 1);
    assert!(logit[0].score > 0.5);

    let raw = GridDecoder::new(&table)
      .gate(ObjectnessGate::RawHalf)
      .decode(&[view])
      .unwrap();
    assert!(raw.is_empty());
  }

  #[test]
  fn objectness_gate_ignores_class_threshold() {
    let table = single_anchor_table(640);
    // sigmoid(-0.2) = 0.45, above the class threshold but below one half
    let data = [0.0, 0.0, 0.0, 0.0, -0.2, 10.0, -5.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();
    let boxes = GridDecoder::new(&table)
      .conf_threshold(0.3)
      .decode(&[view])
      .unwrap();
    assert!(boxes.is_empty());

    let data = [0.0, 0.0, 0.0, 0.0, 0.2, 10.0, -5.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();
    let boxes = GridDecoder::new(&table)
      .conf_threshold(0.3)
      .decode(&[view])
      .unwrap();
    assert_eq!(boxes.len(), 1);
  }

  #[test]
  fn oversized_class_offset_is_rejected() {
    let table = single_anchor_table(640);
    let mut data = vec![-5.0f32; 5 + 80];
    data[4] = 12.0;
    data[5 + 3] = 12.0;
    let view = TensorView::new(&data, &[1, 1, 1, 1, 85]).unwrap();

    let err = GridDecoder::new(&table)
      .class_offset(Some(1_000_000_000))
      .decode(std::slice::from_ref(&view))
      .unwrap_err();
    assert!(matches!(
      err,
      PostProcessError::ClassOffsetOverflow {
        classes: 80,
        max_wh: 1_000_000_000,
        ..
      }
    ));

    let boxes = GridDecoder::new(&table)
      .class_offset(Some(7680))
      .decode(&[view])
      .unwrap();
    assert_eq!(boxes[0].class_id, 3);
    assert_eq!(boxes[0].x, 270 + 3 * 7680);
  }

  #[test]
  fn inverse_sigmoid_filter_matches_product_rule() {
    let table = single_anchor_table(640);
    for (obj, class, expected) in [(1.0, -1.0, false), (1.0, 2.0, true), (3.0, 0.5, true), (0.02, 1.0, false)] {
      let data = [0.0, 0.0, 0.0, 0.0, obj, class, -9.0];
      let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();
      let boxes = GridDecoder::new(&table).decode(&[view]).unwrap();
      let direct = sigmoid(class) * sigmoid(obj) > 0.5;
      assert_eq!(direct, expected);
      assert_eq!(!boxes.is_empty(), expected, "obj={} class={}", obj, class);
    }
  }

  #[test]
  fn class_offset_shifts_coordinates() {
    let table = single_anchor_table(640);
    let data = [0.0, 0.0, 0.0, 0.0, 12.0, -5.0, 12.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();

    let boxes = GridDecoder::new(&table)
      .class_offset(Some(7680))
      .decode(&[view])
      .unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class_id, 1);
    assert_eq!((boxes[0].x, boxes[0].y), (270 + 7680, 270 + 7680));
  }

  #[test]
  fn first_maximum_wins_on_ties() {
    assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), (1, 3.0));
    assert_eq!(argmax(&[-1.0]), (0, -1.0));
  }

  #[test]
  fn nan_cells_are_dropped() {
    let table = single_anchor_table(640);
    let data = [0.0, 0.0, 0.0, 0.0, f32::NAN, 12.0, -5.0];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();
    assert!(GridDecoder::new(&table).decode(&[view]).unwrap().is_empty());

    let data = [0.0, 0.0, 0.0, 0.0, 12.0, f32::NAN, f32::NAN];
    let view = TensorView::new(&data, &[1, 1, 1, 1, 7]).unwrap();
    assert!(GridDecoder::new(&table).decode(&[view]).unwrap().is_empty());
  }

  #[test]
  fn malformed_outputs_are_rejected() {
    let table = single_anchor_table(640);
    let decoder = GridDecoder::new(&table);

    assert_eq!(decoder.decode(&[]), Err(PostProcessError::NoOutputs));

    let data = [0.0f32; 14];
    let rank4 = TensorView::new(&data[..7], &[1, 1, 1, 7]).unwrap();
    assert!(matches!(
      decoder.decode(&[rank4]),
      Err(PostProcessError::Tensor(_))
    ));

    let batch2 = TensorView::new(&data, &[2, 1, 1, 1, 7]).unwrap();
    assert!(matches!(
      decoder.decode(&[batch2]),
      Err(PostProcessError::UnsupportedBatch { index: 0, batch: 2 })
    ));

    let narrow = TensorView::new(&data[..5], &[1, 1, 1, 1, 5]).unwrap();
    assert!(matches!(
      decoder.decode(&[narrow]),
      Err(PostProcessError::TooFewChannels { channels: 5, .. })
    ));

    let two_anchors = TensorView::new(&data, &[1, 2, 1, 1, 7]).unwrap();
    assert!(matches!(
      decoder.decode(&[two_anchors]),
      Err(PostProcessError::AnchorCountMismatch {
        expected: 1,
        actual: 2,
        ..
      })
    ));

    let odd = vec![0.0f32; 7 * 7 * 7];
    let odd_grid = TensorView::new(&odd, &[1, 1, 7, 7, 7]).unwrap();
    assert!(matches!(
      decoder.decode(&[odd_grid]),
      Err(PostProcessError::StrideMismatch { grid_width: 7, .. })
    ));

    let quad = vec![0.0f32; 2 * 2 * 7];
    let stride320 = TensorView::new(&quad, &[1, 1, 2, 2, 7]).unwrap();
    assert!(matches!(
      decoder.decode(&[stride320]),
      Err(PostProcessError::NoAnchorGroup { stride: 320, .. })
    ));

    let single = TensorView::new(&data[..7], &[1, 1, 1, 1, 7]).unwrap();
    assert!(matches!(
      decoder.decode(&[single.clone(), single]),
      Err(PostProcessError::DuplicateScale {
        index: 1,
        previous: 0,
        ..
      })
    ));
  }
}
