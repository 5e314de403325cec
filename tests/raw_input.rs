// 该文件是 Beifeng （北风） 项目的一部分。
// tests/raw_input.rs - 原始张量转储读取测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use beifeng::{
  FromUrl,
  input::{InputError, RawTensorInput, RawTensorInputError, load_tensors},
  tensor::TensorError,
};
use url::Url;

fn dump(name: &str, values: &[f32]) -> PathBuf {
  let path = std::env::temp_dir().join(format!("beifeng-{}-{}.dat", std::process::id(), name));
  let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
  std::fs::write(&path, bytes).unwrap();
  path
}

fn raw_url(path: &PathBuf, query: &str) -> Url {
  let mut url = Url::parse("raw:///").unwrap();
  url.set_path(&path.to_string_lossy());
  if !query.is_empty() {
    url.set_query(Some(query));
  }
  url
}

#[test]
fn loads_shaped_f32_dump() {
  let values: Vec<f32> = (0..14).map(|v| v as f32 * 0.5).collect();
  let path = dump("shaped", &values);

  let url = raw_url(&path, "shape=1,1,1,2,7");
  let tensor = RawTensorInput::from_url(&url).unwrap().load().unwrap();
  assert_eq!(tensor.shape().dims(), &[1, 1, 1, 2, 7]);
  assert_eq!(tensor.view().as_slice(), values.as_slice());

  let flat = RawTensorInput::from_url(&raw_url(&path, "")).unwrap().load().unwrap();
  assert_eq!(flat.shape().dims(), &[14]);

  std::fs::remove_file(path).ok();
}

#[test]
fn shape_must_match_file_size() {
  let path = dump("mismatch", &[1.0, 2.0, 3.0]);
  let url = raw_url(&path, "shape=1,1,1,1,7");
  let err = RawTensorInput::from_url(&url).unwrap().load().unwrap_err();
  assert!(matches!(
    err,
    RawTensorInputError::TensorError(TensorError::LengthMismatch { .. })
  ));

  let huge = format!("shape={},3,4", usize::MAX / 2);
  let err = RawTensorInput::from_url(&raw_url(&path, &huge))
    .unwrap()
    .load()
    .unwrap_err();
  assert!(matches!(
    err,
    RawTensorInputError::TensorError(TensorError::ElementCountOverflow { .. })
  ));
  std::fs::remove_file(path).ok();
}

#[test]
fn bad_queries_and_schemes_are_rejected() {
  let bad_shape = Url::parse("raw:///tmp/x.dat?shape=1,a").unwrap();
  assert!(matches!(
    RawTensorInput::from_url(&bad_shape),
    Err(RawTensorInputError::InvalidQuery { .. })
  ));

  let bad_type = Url::parse("raw:///tmp/x.dat?dtype=bf16").unwrap();
  assert!(matches!(
    RawTensorInput::from_url(&bad_type),
    Err(RawTensorInputError::TensorError(TensorError::UnsupportedType(_)))
  ));

  let image = Url::parse("image:///tmp/x.png").unwrap();
  assert!(matches!(
    load_tensors(&[image]),
    Err(InputError::SchemeMismatch(_))
  ));
}
