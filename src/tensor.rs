// 该文件是 Beifeng （北风） 项目的一部分。
// src/tensor.rs - 主机端张量视图定义
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

use std::{fmt, str::FromStr};

use thiserror::Error;

/// 张量最大维度数量
pub const MAX_TENSOR_RANK: usize = 5;

/// 网格输出张量的维度数量: (batch, anchor, height, width, channel)
pub const GRID_TENSOR_RANK: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("张量形状为空")]
  EmptyShape,
  #[error("张量维度数量 {rank} 超出上限 {max}")]
  RankTooLarge { rank: usize, max: usize },
  #[error("张量第 {axis} 维为零: {shape}")]
  ZeroDimension { axis: usize, shape: Shape },
  #[error("张量元素数量溢出: {shape}")]
  ElementCountOverflow { shape: Shape },
  #[error("张量维度数量不匹配: 期望 {expected}, 实际为 {actual} ({shape})")]
  RankMismatch {
    expected: usize,
    actual: usize,
    shape: Shape,
  },
  #[error("张量数据长度不匹配: 形状 {shape} 需要 {expected} 个元素, 实际为 {actual}")]
  LengthMismatch {
    shape: Shape,
    expected: usize,
    actual: usize,
  },
  #[error("字节长度 {len} 不是元素大小 {elem} 的整数倍")]
  UnalignedBytes { len: usize, elem: usize },
  #[error("不支持的数据类型: {0}")]
  UnsupportedType(String),
  #[error("比较的张量长度不一致: {left} 与 {right}")]
  CompareLengthMismatch { left: usize, right: usize },
}

/// 张量形状，所有维度均为正数
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Box<[usize]>);

impl Shape {
  pub fn new(dims: &[usize]) -> Result<Self, TensorError> {
    if dims.is_empty() {
      return Err(TensorError::EmptyShape);
    }
    if dims.len() > MAX_TENSOR_RANK {
      return Err(TensorError::RankTooLarge {
        rank: dims.len(),
        max: MAX_TENSOR_RANK,
      });
    }
    let shape = Shape(dims.into());
    if let Some(axis) = dims.iter().position(|&d| d == 0) {
      return Err(TensorError::ZeroDimension { axis, shape });
    }
    if dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).is_none() {
      return Err(TensorError::ElementCountOverflow { shape });
    }
    Ok(shape)
  }

  pub fn dims(&self) -> &[usize] {
    &self.0
  }

  pub fn rank(&self) -> usize {
    self.0.len()
  }

  /// 构造时已检查乘积不会溢出
  pub fn num_elements(&self) -> usize {
    self.0.iter().product()
  }
}

impl fmt::Display for Shape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[ ")?;
    for dim in self.0.iter() {
      write!(f, "{} ", dim)?;
    }
    write!(f, "]")
  }
}

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorType {
  #[default]
  Float32,
  Int8,
  UInt8,
  Int16,
  UInt16,
  Int32,
  UInt32,
}

impl TensorType {
  /// 单个元素的字节数
  pub fn size_of(&self) -> usize {
    match self {
      TensorType::Float32 | TensorType::Int32 | TensorType::UInt32 => 4,
      TensorType::Int16 | TensorType::UInt16 => 2,
      TensorType::Int8 | TensorType::UInt8 => 1,
    }
  }

  fn decode_le(&self, bytes: &[u8]) -> f32 {
    match self {
      TensorType::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
      TensorType::Int8 => bytes[0] as i8 as f32,
      TensorType::UInt8 => bytes[0] as f32,
      TensorType::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
      TensorType::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
      TensorType::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
      TensorType::UInt32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
    }
  }
}

impl FromStr for TensorType {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "f32" | "float32" => Ok(TensorType::Float32),
      "i8" | "int8" => Ok(TensorType::Int8),
      "u8" | "uint8" => Ok(TensorType::UInt8),
      "i16" | "int16" => Ok(TensorType::Int16),
      "u16" | "uint16" => Ok(TensorType::UInt16),
      "i32" | "int32" => Ok(TensorType::Int32),
      "u32" | "uint32" => Ok(TensorType::UInt32),
      other => Err(TensorError::UnsupportedType(other.to_string())),
    }
  }
}

impl fmt::Display for TensorType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TensorType::Float32 => "FLOAT32",
      TensorType::Int8 => "INT8",
      TensorType::UInt8 => "UINT8",
      TensorType::Int16 => "INT16",
      TensorType::UInt16 => "UINT16",
      TensorType::Int32 => "INT32",
      TensorType::UInt32 => "UINT32",
    };
    f.write_str(name)
  }
}

/// 只读的主机端张量视图，不持有底层内存
#[derive(Debug, Clone)]
pub struct TensorView<'a> {
  data: &'a [f32],
  shape: Shape,
}

impl<'a> TensorView<'a> {
  pub fn new(data: &'a [f32], dims: &[usize]) -> Result<Self, TensorError> {
    let shape = Shape::new(dims)?;
    let expected = shape.num_elements();
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { data, shape })
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    self.shape.dims()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  /// 视图中的数据在反量化后总是 FLOAT32
  pub fn dtype(&self) -> TensorType {
    TensorType::Float32
  }

  pub fn as_slice(&self) -> &'a [f32] {
    self.data
  }

  /// 以网格布局解释该张量
  pub fn as_grid(&self) -> Result<GridView<'a>, TensorError> {
    GridView::try_from(self)
  }
}

/// 五维网格输出的带边界检查的跨步视图
///
/// 布局为 `(batch, anchor, height, width, channel)`，只访问第 0 个批次。
#[derive(Debug, Clone, Copy)]
pub struct GridView<'a> {
  data: &'a [f32],
  batch: usize,
  anchors: usize,
  height: usize,
  width: usize,
  channels: usize,
}

impl<'a> TryFrom<&TensorView<'a>> for GridView<'a> {
  type Error = TensorError;

  fn try_from(view: &TensorView<'a>) -> Result<Self, Self::Error> {
    match *view.dims() {
      [batch, anchors, height, width, channels] => Ok(GridView {
        data: view.as_slice(),
        batch,
        anchors,
        height,
        width,
        channels,
      }),
      _ => Err(TensorError::RankMismatch {
        expected: GRID_TENSOR_RANK,
        actual: view.rank(),
        shape: view.shape().clone(),
      }),
    }
  }
}

impl<'a> GridView<'a> {
  pub fn batch(&self) -> usize {
    self.batch
  }

  pub fn anchors(&self) -> usize {
    self.anchors
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  fn plane_len(&self) -> usize {
    self.height * self.width * self.channels
  }

  /// 读取单个网格单元的全部通道
  pub fn cell(&self, anchor: usize, row: usize, col: usize) -> Option<&'a [f32]> {
    if anchor >= self.anchors || row >= self.height || col >= self.width {
      return None;
    }
    let start = anchor * self.plane_len() + (row * self.width + col) * self.channels;
    self.data.get(start..start + self.channels)
  }

  /// 按行优先顺序遍历某个锚框的所有单元，产出 `(row, col, channels)`
  pub fn anchor_cells(
    &self,
    anchor: usize,
  ) -> impl Iterator<Item = (usize, usize, &'a [f32])> + use<'a> {
    let plane = self.plane_len();
    let start = anchor * plane;
    let width = self.width;
    let cells = if anchor < self.anchors {
      self.data.get(start..start + plane).unwrap_or(&[])
    } else {
      &[]
    };
    cells
      .chunks_exact(self.channels)
      .enumerate()
      .map(move |(i, cell)| (i / width, i % width, cell))
  }
}

/// 主机端拥有内存的张量，用于从转储文件加载输出
#[derive(Debug, Clone)]
pub struct HostTensor {
  data: Box<[f32]>,
  shape: Shape,
}

impl HostTensor {
  pub fn new(data: Vec<f32>, dims: &[usize]) -> Result<Self, TensorError> {
    TensorView::new(&data, dims)?;
    Ok(Self {
      data: data.into_boxed_slice(),
      shape: Shape::new(dims)?,
    })
  }

  /// 按小端字节序解码，非浮点类型乘以量化比例转为浮点
  pub fn from_le_bytes(
    bytes: &[u8],
    dims: &[usize],
    dtype: TensorType,
    scale: f32,
  ) -> Result<Self, TensorError> {
    let elem = dtype.size_of();
    if bytes.len() % elem != 0 {
      return Err(TensorError::UnalignedBytes {
        len: bytes.len(),
        elem,
      });
    }
    let data = bytes
      .chunks_exact(elem)
      .map(|chunk| match dtype {
        TensorType::Float32 => dtype.decode_le(chunk),
        _ => dtype.decode_le(chunk) * scale,
      })
      .collect();
    Self::new(data, dims)
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn view(&self) -> TensorView<'_> {
    TensorView {
      data: &self.data,
      shape: self.shape.clone(),
    }
  }
}

/// 两个张量之间的绝对误差统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorDiff {
  pub sum: f64,
  pub mean: f64,
}

pub fn compare(left: &[f32], right: &[f32]) -> Result<TensorDiff, TensorError> {
  if left.len() != right.len() {
    return Err(TensorError::CompareLengthMismatch {
      left: left.len(),
      right: right.len(),
    });
  }
  let sum: f64 = left
    .iter()
    .zip(right)
    .map(|(&a, &b)| f64::from((a - b).abs()))
    .sum();
  let mean = if left.is_empty() {
    0.0
  } else {
    sum / left.len() as f64
  };
  Ok(TensorDiff { sum, mean })
}
