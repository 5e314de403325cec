// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/anchor.rs - 锚框表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

const YOLOV5_STRIDES: [u32; 3] = [8, 16, 32];
const YOLOV5_ANCHORS: [[(f32, f32); 3]; 3] = [
  [(10.0, 13.0), (16.0, 30.0), (33.0, 23.0)],
  [(30.0, 61.0), (62.0, 45.0), (59.0, 119.0)],
  [(116.0, 90.0), (156.0, 198.0), (373.0, 326.0)],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub width: f32,
  pub height: f32,
}

impl Anchor {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

/// 一个检测头使用的锚框组，通过步长与输出张量对应
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorGroup {
  pub stride: u32,
  pub anchors: Box<[Anchor]>,
}

impl AnchorGroup {
  pub fn new(stride: u32, anchors: Vec<Anchor>) -> Self {
    Self {
      stride,
      anchors: anchors.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTable {
  groups: Box<[AnchorGroup]>,
}

impl AnchorTable {
  pub fn new(groups: Vec<AnchorGroup>) -> Self {
    Self {
      groups: groups.into_boxed_slice(),
    }
  }

  /// YOLOv5 默认的 3x3 锚框
  pub fn yolov5() -> Self {
    let groups = YOLOV5_STRIDES
      .iter()
      .zip(YOLOV5_ANCHORS)
      .map(|(&stride, anchors)| {
        AnchorGroup::new(
          stride,
          anchors.iter().map(|&(w, h)| Anchor::new(w, h)).collect(),
        )
      })
      .collect();
    Self::new(groups)
  }

  pub fn groups(&self) -> &[AnchorGroup] {
    &self.groups
  }

  pub fn by_stride(&self, stride: u32) -> Option<&AnchorGroup> {
    self.groups.iter().find(|g| g.stride == stride)
  }
}

impl Default for AnchorTable {
  fn default() -> Self {
    Self::yolov5()
  }
}
