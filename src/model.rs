// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 模型后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::ops::{Add, Div, Mul};

use thiserror::Error;

use crate::tensor::{TensorError, TensorView};

pub mod anchor;
pub mod coco;
pub mod decode;
pub mod letterbox;
pub mod nms;
mod yolov5;

pub use self::anchor::{Anchor, AnchorGroup, AnchorTable};
pub use self::decode::{CandidateBox, GridDecoder, ObjectnessGate};
pub use self::letterbox::{LetterboxError, LetterboxParams};
pub use self::nms::NmsStrategy;
pub use self::yolov5::{Yolov5, Yolov5Builder};

pub trait PostProcess {
  type Output;
  type Error;

  fn postprocess(&self, outputs: &[TensorView<'_>]) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostProcessError {
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("信箱变换参数错误: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("没有输出张量")]
  NoOutputs,
  #[error("输出 {index}: 批大小必须为 1, 实际为 {batch}")]
  UnsupportedBatch { index: usize, batch: usize },
  #[error("输出 {index}: 通道数 {channels} 不足, 至少需要 {min}")]
  TooFewChannels {
    index: usize,
    channels: usize,
    min: usize,
  },
  #[error("输出 {index}: 通道数 {channels} 与首个输出的 {expected} 不一致")]
  ChannelMismatch {
    index: usize,
    channels: usize,
    expected: usize,
  },
  #[error("输出 {index}: 网格 {grid_width}x{grid_height} 与输入 {input_width}x{input_height} 无法对应到同一步长")]
  StrideMismatch {
    index: usize,
    grid_width: usize,
    grid_height: usize,
    input_width: u32,
    input_height: u32,
  },
  #[error("输出 {index}: 找不到步长为 {stride} 的锚框组")]
  NoAnchorGroup { index: usize, stride: u32 },
  #[error("输出 {index}: 锚框数量 {actual} 与步长 {stride} 的锚框组 ({expected}) 不一致")]
  AnchorCountMismatch {
    index: usize,
    stride: u32,
    expected: usize,
    actual: usize,
  },
  #[error("输出 {index}: 步长 {stride} 已被输出 {previous} 使用")]
  DuplicateScale {
    index: usize,
    stride: u32,
    previous: usize,
  },
  #[error("输出 {index}: {classes} 个类别乘以 max_wh {max_wh} 超出坐标范围")]
  ClassOffsetOverflow {
    index: usize,
    classes: usize,
    max_wh: i32,
  },
  #[error("配置错误: {0}")]
  Config(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 轴对齐矩形，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect<T> {
  pub x: T,
  pub y: T,
  pub width: T,
  pub height: T,
}

impl<T> Rect<T>
where
  T: Copy + PartialEq + From<u8> + Add<Output = T> + Mul<Output = T> + Div<Output = T>,
{
  pub fn new(x: T, y: T, width: T, height: T) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn left(&self) -> T {
    self.x
  }

  pub fn top(&self) -> T {
    self.y
  }

  pub fn right(&self) -> T {
    self.x + self.width
  }

  pub fn bottom(&self) -> T {
    self.y + self.height
  }

  pub fn center(&self) -> (T, T) {
    let two = T::from(2);
    (self.x + self.width / two, self.y + self.height / two)
  }

  pub fn area(&self) -> T {
    self.width * self.height
  }

  pub fn is_empty(&self) -> bool {
    self.width == T::from(0) || self.height == T::from(0)
  }
}

/// 原始帧坐标系下的检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: Rect<i32>,
  pub score: f32,
  pub class_id: u32,
}

impl Detection {
  pub fn label(&self) -> &'static str {
    coco::label_name(self.class_id)
  }
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}
