// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 后处理流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::str::FromStr;

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    AnchorTable, DetectResult, GridDecoder, LetterboxParams, NmsStrategy, ObjectnessGate,
    PostProcess, PostProcessError,
    decode::{DEFAULT_CONF_THRESHOLD, DEFAULT_INPUT_SIZE},
    letterbox::{DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH},
    nms::{DEFAULT_IOU_THRESHOLD, class_aware_nms},
  },
  tensor::TensorView,
};

/// 解码 -> NMS -> 坐标重映射，帧与帧之间没有状态
#[derive(Debug, Clone)]
pub struct Yolov5 {
  anchors: AnchorTable,
  input_width: u32,
  input_height: u32,
  conf_threshold: f32,
  iou_threshold: f32,
  gate: ObjectnessGate,
  strategy: NmsStrategy,
  letterbox: LetterboxParams,
}

#[derive(Debug, Clone)]
pub struct Yolov5Builder {
  anchors: AnchorTable,
  input_width: u32,
  input_height: u32,
  frame_width: u32,
  frame_height: u32,
  conf_threshold: f32,
  iou_threshold: f32,
  gate: ObjectnessGate,
  strategy: NmsStrategy,
  padding: Option<(i32, i32)>,
  ratio: Option<f32>,
}

impl Default for Yolov5Builder {
  fn default() -> Self {
    Self {
      anchors: AnchorTable::yolov5(),
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      frame_width: DEFAULT_FRAME_WIDTH,
      frame_height: DEFAULT_FRAME_HEIGHT,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      gate: ObjectnessGate::default(),
      strategy: NmsStrategy::default(),
      padding: None,
      ratio: None,
    }
  }
}

impl FromUrlWithScheme for Yolov5Builder {
  const SCHEME: &'static str = "yolov5";
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, PostProcessError> {
  value
    .parse()
    .map_err(|_| PostProcessError::Config(format!("参数 {} 的值无效: {}", key, value)))
}

fn parse_pair<T: FromStr>(key: &str, value: &str, sep: char) -> Result<(T, T), PostProcessError> {
  let (a, b) = value
    .split_once(sep)
    .ok_or_else(|| PostProcessError::Config(format!("参数 {} 的格式应为 A{}B: {}", key, sep, value)))?;
  Ok((parse_value(key, a)?, parse_value(key, b)?))
}

impl FromUrl for Yolov5Builder {
  type Error = PostProcessError;

  /// `yolov5:///?conf=0.5&iou=0.5&nms=partition&gate=logit&input=640x640&frame=1920x1080`
  ///
  /// 可选 `max_wh` 覆盖 offset 策略的偏移量，`pad=X,Y` 与 `ratio` 显式指定信箱参数。
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PostProcessError::SchemeMismatch(format!(
        "模型配置必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = Yolov5Builder::default();
    let mut max_wh = None;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "conf" => builder.conf_threshold = parse_value(&key, &value)?,
        "iou" => builder.iou_threshold = parse_value(&key, &value)?,
        "nms" => builder.strategy = value.parse()?,
        "max_wh" => max_wh = Some(parse_value(&key, &value)?),
        "gate" => builder.gate = value.parse()?,
        "input" => (builder.input_width, builder.input_height) = parse_pair(&key, &value, 'x')?,
        "frame" => (builder.frame_width, builder.frame_height) = parse_pair(&key, &value, 'x')?,
        "pad" => builder.padding = Some(parse_pair(&key, &value, ',')?),
        "ratio" => builder.ratio = Some(parse_value(&key, &value)?),
        other => debug!("忽略未知参数: {}", other),
      }
    }

    if let (Some(max_wh), NmsStrategy::ClassOffset { .. }) = (max_wh, builder.strategy) {
      builder.strategy = NmsStrategy::ClassOffset { max_wh };
    }

    Ok(builder)
  }
}

impl Yolov5Builder {
  pub fn anchors(mut self, anchors: AnchorTable) -> Self {
    self.anchors = anchors;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn frame_size(mut self, width: u32, height: u32) -> Self {
    self.frame_width = width;
    self.frame_height = height;
    self
  }

  pub fn conf_threshold(mut self, threshold: f32) -> Self {
    self.conf_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn gate(mut self, gate: ObjectnessGate) -> Self {
    self.gate = gate;
    self
  }

  pub fn nms_strategy(mut self, strategy: NmsStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// 显式指定填充和缩放比例，而不是由帧尺寸推导
  pub fn letterbox(mut self, padding: (i32, i32), ratio: f32) -> Self {
    self.padding = Some(padding);
    self.ratio = Some(ratio);
    self
  }

  pub fn build(self) -> Result<Yolov5, PostProcessError> {
    if !(self.conf_threshold > 0.0 && self.conf_threshold < 1.0) {
      return Err(PostProcessError::Config(format!(
        "置信度阈值必须位于 (0, 1): {}",
        self.conf_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(PostProcessError::Config(format!(
        "IoU 阈值必须位于 [0, 1]: {}",
        self.iou_threshold
      )));
    }
    match self.strategy {
      NmsStrategy::ClassOffset { max_wh } if max_wh <= 0 => {
        return Err(PostProcessError::Config(format!("max_wh 必须为正数: {}", max_wh)));
      }
      _ => {}
    }

    let frame = (self.frame_width, self.frame_height);
    let input = (self.input_width, self.input_height);
    let letterbox = match (self.padding, self.ratio) {
      (None, None) => LetterboxParams::fit(frame.0, frame.1, input.0, input.1)?,
      (padding, Some(ratio)) => LetterboxParams::new(frame, input, padding.unwrap_or((0, 0)), ratio)?,
      (Some(_), None) => {
        return Err(PostProcessError::Config("指定填充时必须同时指定 ratio".to_string()));
      }
    };

    info!(
      "YOLOv5 后处理: 输入 {}x{}, 帧 {}x{}, 置信度 {}, IoU {}, 策略 {:?}, 预筛选 {:?}",
      input.0,
      input.1,
      frame.0,
      frame.1,
      self.conf_threshold,
      self.iou_threshold,
      self.strategy,
      self.gate
    );

    Ok(Yolov5 {
      anchors: self.anchors,
      input_width: self.input_width,
      input_height: self.input_height,
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
      gate: self.gate,
      strategy: self.strategy,
      letterbox,
    })
  }
}

impl Yolov5 {
  pub fn builder() -> Yolov5Builder {
    Yolov5Builder::default()
  }

  pub fn decoder(&self) -> GridDecoder<'_> {
    GridDecoder::new(&self.anchors)
      .input_size(self.input_width, self.input_height)
      .conf_threshold(self.conf_threshold)
      .gate(self.gate)
      .class_offset(self.strategy.class_offset())
  }

  pub fn letterbox(&self) -> &LetterboxParams {
    &self.letterbox
  }

  pub fn strategy(&self) -> NmsStrategy {
    self.strategy
  }
}

impl PostProcess for Yolov5 {
  type Output = DetectResult;
  type Error = PostProcessError;

  fn postprocess(&self, outputs: &[TensorView<'_>]) -> Result<Self::Output, Self::Error> {
    debug!("后处理 {} 个输出张量", outputs.len());
    let candidates = self.decoder().decode(outputs)?;
    debug!("置信度过滤后候选框数量: {}", candidates.len());

    let survivors = class_aware_nms(candidates, self.iou_threshold, self.strategy);
    debug!("NMS 后剩余: {}", survivors.len());

    let offset = self.strategy.class_offset();
    let items: Vec<_> = survivors
      .iter()
      .map(|candidate| self.letterbox.remap(candidate, offset))
      .collect();

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("yolov5:///?conf=0.4&iou=0.6&nms=offset&max_wh=4096&gate=raw&frame=1280x720")
      .unwrap();
    let model = Yolov5Builder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(model.strategy(), NmsStrategy::ClassOffset { max_wh: 4096 });
    assert_eq!(model.letterbox().source_size(), (1280, 720));
    assert_eq!(model.letterbox().padding(), (0, 140));
  }

  #[test]
  fn builder_accepts_explicit_letterbox() {
    let url = Url::parse("yolov5:///?pad=0,140&ratio=0.333").unwrap();
    let model = Yolov5Builder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(model.letterbox().padding(), (0, 140));
    assert_eq!(model.letterbox().ratio(), 0.333);
  }

  #[test]
  fn builder_rejects_bad_configuration() {
    let wrong = Url::parse("yolo26:///model.rknn").unwrap();
    assert!(matches!(
      Yolov5Builder::from_url(&wrong),
      Err(PostProcessError::SchemeMismatch(_))
    ));

    let bad_size = Url::parse("yolov5:///?frame=1920").unwrap();
    assert!(Yolov5Builder::from_url(&bad_size).is_err());

    assert!(Yolov5::builder().conf_threshold(1.0).build().is_err());
    assert!(Yolov5::builder().iou_threshold(1.5).build().is_err());
    assert!(matches!(
      Yolov5::builder().letterbox((0, 0), 0.0).build(),
      Err(PostProcessError::Letterbox(_))
    ));
  }
}
