// 该文件是 Beifeng （北风） 项目的一部分。
// tests/pipeline_end_to_end.rs - 端到端后处理测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use beifeng::{
  FromUrl,
  model::{
    Detection, NmsStrategy, ObjectnessGate, PostProcess, PostProcessError, Yolov5,
    Yolov5Builder, nms::DEFAULT_MAX_WH,
  },
  tensor::TensorView,
};
use url::Url;

const CHANNELS: usize = 7;
const ANCHORS: usize = 3;

struct ScaleBuffer {
  grid: usize,
  data: Vec<f32>,
}

impl ScaleBuffer {
  /// 所有单元的目标置信度都很低
  fn empty(grid: usize) -> Self {
    let mut data = vec![0.0f32; ANCHORS * grid * grid * CHANNELS];
    for cell in data.chunks_exact_mut(CHANNELS) {
      cell[4] = -8.0;
    }
    Self { grid, data }
  }

  fn set(&mut self, anchor: usize, row: usize, col: usize, values: [f32; CHANNELS]) {
    let start = ((anchor * self.grid + row) * self.grid + col) * CHANNELS;
    self.data[start..start + CHANNELS].copy_from_slice(&values);
  }

  fn view(&self) -> TensorView<'_> {
    TensorView::new(&self.data, &[1, ANCHORS, self.grid, self.grid, CHANNELS]).unwrap()
  }
}

/// 三个尺度: 一个物体、一个同类重复框、一个异类重叠框，以及一个大物体
fn planted_scales() -> Vec<ScaleBuffer> {
  let mut small = ScaleBuffer::empty(80);
  small.set(0, 40, 40, [0.0, 0.0, 0.0, 0.0, 10.0, 10.0, -10.0]);
  small.set(0, 40, 41, [-20.0, 0.0, 0.0, 0.0, 5.0, 10.0, -10.0]);
  small.set(0, 41, 40, [0.0, -20.0, 0.0, 0.0, 6.0, -10.0, 10.0]);

  let medium = ScaleBuffer::empty(40);

  let mut large = ScaleBuffer::empty(20);
  large.set(2, 10, 10, [0.0, 0.0, 0.0, 0.0, 8.0, 8.0, -8.0]);

  vec![small, medium, large]
}

fn run(strategy: NmsStrategy, scales: &[ScaleBuffer]) -> Vec<Detection> {
  let model = Yolov5::builder()
    .frame_size(1920, 1080)
    .nms_strategy(strategy)
    .build()
    .unwrap();
  let views: Vec<_> = scales.iter().map(|s| s.view()).collect();
  model.postprocess(&views).unwrap().items.into_vec()
}

fn assert_near(actual: i32, expected: i32) {
  assert!(
    (actual - expected).abs() <= 1,
    "expected {} +/- 1, got {}",
    expected,
    actual
  );
}

#[test]
fn partitioned_pipeline_keeps_one_box_per_class() {
  let detections = run(NmsStrategy::Partitioned, &planted_scales());
  assert_eq!(detections.len(), 3);

  // ascending score order
  assert!(detections.windows(2).all(|w| w[0].score <= w[1].score));

  let best = detections.last().unwrap();
  assert_eq!(best.class_id, 0);
  assert!(best.score > 0.999);
  assert_near(best.bbox.x, 957);
  assert_near(best.bbox.y, 531);
  assert_near(best.bbox.width, 30);
  assert_near(best.bbox.height, 39);

  let other_class: Vec<_> = detections.iter().filter(|d| d.class_id == 1).collect();
  assert_eq!(other_class.len(), 1);
  assert_eq!(other_class[0].bbox, best.bbox);

  let large = detections
    .iter()
    .find(|d| d.bbox.width > 1000)
    .expect("large object from stride 32");
  assert_near(large.bbox.x, 447);
  assert_near(large.bbox.y, 99);
}

#[test]
fn offset_strategy_matches_partitioned() {
  let scales = planted_scales();
  let partitioned = run(NmsStrategy::Partitioned, &scales);
  let offset = run(
    NmsStrategy::ClassOffset {
      max_wh: DEFAULT_MAX_WH,
    },
    &scales,
  );
  assert_eq!(partitioned, offset);
}

#[test]
fn agnostic_strategy_merges_classes() {
  let detections = run(NmsStrategy::Agnostic, &planted_scales());
  assert_eq!(detections.len(), 2);
  assert!(detections.iter().all(|d| d.class_id == 0));
}

#[test]
fn detections_stay_inside_the_frame() {
  for detection in run(NmsStrategy::Partitioned, &planted_scales()) {
    let bbox = detection.bbox;
    assert!(bbox.x >= 0 && bbox.y >= 0);
    assert!(bbox.right() <= 1920);
    assert!(bbox.bottom() <= 1080);
    assert!((0.0..=1.0).contains(&detection.score));
  }
}

#[test]
fn scale_order_does_not_matter() {
  let scales = planted_scales();
  let mut reversed = planted_scales();
  reversed.reverse();
  assert_eq!(
    run(NmsStrategy::Partitioned, &scales),
    run(NmsStrategy::Partitioned, &reversed)
  );
}

#[test]
fn reference_gate_agrees_on_confident_cells() {
  let scales = planted_scales();
  let views: Vec<_> = scales.iter().map(|s| s.view()).collect();
  let logit = Yolov5::builder().build().unwrap().postprocess(&views).unwrap();
  let raw = Yolov5::builder()
    .gate(ObjectnessGate::RawHalf)
    .build()
    .unwrap()
    .postprocess(&views)
    .unwrap();
  assert_eq!(logit.items, raw.items);
}

#[test]
fn empty_grids_are_not_an_error() {
  let scales = vec![
    ScaleBuffer::empty(80),
    ScaleBuffer::empty(40),
    ScaleBuffer::empty(20),
  ];
  assert!(run(NmsStrategy::Partitioned, &scales).is_empty());
}

#[test]
fn mismatched_tensor_is_reported() {
  let data = vec![0.0f32; ANCHORS * 30 * 30 * CHANNELS];
  let view = TensorView::new(&data, &[1, ANCHORS, 30, 30, CHANNELS]).unwrap();
  let err = Yolov5::builder()
    .build()
    .unwrap()
    .postprocess(&[view])
    .unwrap_err();
  assert!(matches!(err, PostProcessError::StrideMismatch { index: 0, .. }));
}

#[test]
fn oversized_max_wh_is_reported_not_panicking() {
  let url = Url::parse("yolov5:///?nms=offset&max_wh=1000000000").unwrap();
  let model = Yolov5Builder::from_url(&url).unwrap().build().unwrap();

  // 80 classes, one confident class-3 cell on the stride 32 grid
  let channels = 85;
  let mut data = vec![-8.0f32; ANCHORS * 20 * 20 * channels];
  let cell = &mut data[..channels];
  cell[..4].fill(0.0);
  cell[4] = 8.0;
  cell[5 + 3] = 8.0;
  let view = TensorView::new(&data, &[1, ANCHORS, 20, 20, channels]).unwrap();

  let err = model.postprocess(&[view]).unwrap_err();
  assert!(matches!(
    err,
    PostProcessError::ClassOffsetOverflow {
      index: 0,
      classes: 80,
      ..
    }
  ));
}
