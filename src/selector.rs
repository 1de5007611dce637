// 该文件是 Quyu （区域特征） 项目的一部分。
// src/selector.rs - 区域筛选
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

//! 把检测器的原始候选区域缩减为数量有界、结果确定的保留集合。
//!
//! 对每个非背景类别分别做贪心 NMS，幸存者用该类别分数刷新自己的
//! 运行置信度（逐元素取最大值）；之后按置信度阈值取候选，
//! 数量不足 `min_boxes` 时按置信度补齐，超过 `max_boxes` 时截断。

use std::cmp::Ordering;

use tracing::debug;

use crate::detector::RawProposalSet;

/// 像素坐标包含端点，宽高按 `x_max - x_min + 1` 计算
const PIXEL_OFFSET: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorConfig {
  /// NMS IoU 阈值，IoU 严格大于该值的框被抑制
  pub nms_threshold: f32,
  /// 运行置信度不低于该值的候选进入保留集合
  pub conf_threshold: f32,
  pub min_boxes: usize,
  pub max_boxes: usize,
}

impl Default for SelectorConfig {
  fn default() -> Self {
    SelectorConfig {
      nms_threshold: 0.3,
      conf_threshold: 0.2,
      min_boxes: 10,
      max_boxes: 100,
    }
  }
}

/// 保留下来的区域，各数组与 `indices` 一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeptSelection {
  pub indices: Vec<usize>,
  pub boxes: Vec<[f32; 4]>,
  pub features: Vec<Vec<f32>>,
  pub confidences: Vec<f32>,
  pub labels: Vec<u32>,
}

impl KeptSelection {
  pub fn len(&self) -> usize {
    self.indices.len()
  }

  pub fn is_empty(&self) -> bool {
    self.indices.is_empty()
  }
}

fn area(b: &[f32; 4]) -> f32 {
  (b[2] - b[0] + PIXEL_OFFSET) * (b[3] - b[1] + PIXEL_OFFSET)
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let w = (x2 - x1 + PIXEL_OFFSET).max(0.0);
  let h = (y2 - y1 + PIXEL_OFFSET).max(0.0);
  let intersection = w * h;
  let union = area(a) + area(b) - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按值降序排列下标，值相同时下标小的在前
fn argsort_desc(values: impl Fn(usize) -> f32, len: usize) -> Vec<usize> {
  let mut order: Vec<usize> = (0..len).collect();
  order.sort_by(|&a, &b| values(b).total_cmp(&values(a)).then(a.cmp(&b)));
  order
}

/// 贪心非极大值抑制，返回幸存者下标（按分数降序）
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], threshold: f32) -> Vec<usize> {
  let order = argsort_desc(|i| scores[i], scores.len());
  let mut suppressed = vec![false; order.len()];
  let mut keep = Vec::new();

  for (pos, &i) in order.iter().enumerate() {
    if suppressed[pos] {
      continue;
    }
    keep.push(i);
    for (later, &j) in order.iter().enumerate().skip(pos + 1) {
      if !suppressed[later] && iou(&boxes[i], &boxes[j]) > threshold {
        suppressed[later] = true;
      }
    }
  }
  keep
}

/// 每个候选在所有非背景类别 NMS 幸存时的最高分数
pub fn running_confidence(proposals: &RawProposalSet, nms_threshold: f32) -> Vec<f32> {
  let n = proposals.len();
  let mut confidence = vec![0f32; n];
  let mut scores = vec![0f32; n];

  for class in 1..proposals.num_classes() {
    for (score, row) in scores.iter_mut().zip(&proposals.class_scores) {
      *score = row[class];
    }
    for i in nms(&proposals.boxes, &scores, nms_threshold) {
      if scores[i] > confidence[i] {
        confidence[i] = scores[i];
      }
    }
  }
  confidence
}

/// 根据运行置信度挑出保留下标。
///
/// 阈值内的候选数量落在 `[min_boxes, max_boxes]` 时按原始下标顺序返回；
/// 否则改为按置信度降序（同分时下标小者优先）取前 `min_boxes` 或 `max_boxes` 个。
pub fn keep_indices(confidence: &[f32], config: &SelectorConfig) -> Vec<usize> {
  let candidates: Vec<usize> = confidence
    .iter()
    .enumerate()
    .filter(|&(_, &c)| c >= config.conf_threshold)
    .map(|(i, _)| i)
    .collect();

  let limit = if candidates.len() < config.min_boxes {
    config.min_boxes
  } else if candidates.len() > config.max_boxes {
    config.max_boxes
  } else {
    return candidates;
  };

  let mut ranked = argsort_desc(|i| confidence[i], confidence.len());
  ranked.truncate(limit);
  ranked
}

/// 整行 argmax（含背景类），同分时取第一个
fn argmax(row: &[f32]) -> u32 {
  let mut best = 0usize;
  for (i, value) in row.iter().enumerate() {
    if value.partial_cmp(&row[best]) == Some(Ordering::Greater) {
      best = i;
    }
  }
  best as u32
}

/// 区域筛选主入口，只依赖传入的参数
pub fn select_regions(proposals: &RawProposalSet, config: &SelectorConfig) -> KeptSelection {
  let confidence = running_confidence(proposals, config.nms_threshold);
  let indices = keep_indices(&confidence, config);
  debug!(
    "区域筛选: 候选 {} 个, 保留 {} 个",
    proposals.len(),
    indices.len()
  );

  KeptSelection {
    boxes: indices.iter().map(|&i| proposals.boxes[i]).collect(),
    features: indices
      .iter()
      .map(|&i| proposals.features[i].clone())
      .collect(),
    confidences: indices.iter().map(|&i| confidence[i]).collect(),
    labels: indices
      .iter()
      .map(|&i| argmax(&proposals.class_scores[i]))
      .collect(),
    indices,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const CONF: [f32; 5] = [0.9, 0.1, 0.3, 0.25, 0.05];

  fn config(conf_threshold: f32, min_boxes: usize, max_boxes: usize) -> SelectorConfig {
    SelectorConfig {
      nms_threshold: 0.3,
      conf_threshold,
      min_boxes,
      max_boxes,
    }
  }

  /// 互不重叠的框，每个候选只在第 1 类上有分数
  fn disjoint(scores: &[f32]) -> RawProposalSet {
    RawProposalSet {
      boxes: (0..scores.len())
        .map(|i| {
          let x = i as f32 * 100.0;
          [x, 0.0, x + 10.0, 10.0]
        })
        .collect(),
      class_scores: scores.iter().map(|&s| vec![1.0 - s, s]).collect(),
      features: (0..scores.len()).map(|i| vec![i as f32; 2]).collect(),
    }
  }

  #[test]
  fn threshold_within_bounds() {
    assert_eq!(keep_indices(&CONF, &config(0.2, 3, 4)), vec![0, 2, 3]);
  }

  #[test]
  fn pads_to_min_boxes_ignoring_threshold() {
    assert_eq!(keep_indices(&CONF, &config(0.5, 3, 4)), vec![0, 2, 3]);
  }

  #[test]
  fn truncates_to_max_boxes() {
    assert_eq!(keep_indices(&CONF, &config(0.0, 1, 2)), vec![0, 2]);
  }

  #[test]
  fn within_bounds_keeps_index_order() {
    let conf = [0.3, 0.9, 0.5];
    assert_eq!(keep_indices(&conf, &config(0.2, 1, 5)), vec![0, 1, 2]);
  }

  #[test]
  fn ties_break_by_ascending_index() {
    let conf = [0.4, 0.7, 0.4, 0.7, 0.4];
    assert_eq!(keep_indices(&conf, &config(0.9, 3, 5)), vec![1, 3, 0]);
  }

  #[test]
  fn fewer_proposals_than_min_keeps_all() {
    assert_eq!(keep_indices(&[0.1, 0.6], &config(0.5, 10, 100)), vec![1, 0]);
    assert!(keep_indices(&[], &config(0.5, 10, 100)).is_empty());
  }

  #[test]
  fn iou_uses_inclusive_pixels() {
    let a = [0.0, 0.0, 9.0, 9.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    // 两个 10x10 的框重叠 5 列
    let b = [5.0, 0.0, 14.0, 9.0];
    assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[20.0, 20.0, 29.0, 29.0]), 0.0);
  }

  #[test]
  fn nms_suppresses_overlaps_above_threshold() {
    let boxes = [
      [0.0, 0.0, 9.0, 9.0],
      [1.0, 1.0, 10.0, 10.0],
      [50.0, 50.0, 59.0, 59.0],
      [7.0, 0.0, 16.0, 9.0],
    ];
    let scores = [0.8, 0.9, 0.1, 0.7];
    // 1 压掉 0；3 与 1 的 IoU 约 0.22，不超过 0.3
    assert_eq!(nms(&boxes, &scores, 0.3), vec![1, 3, 2]);
    assert_eq!(nms(&boxes, &scores, 1.0), vec![1, 0, 3, 2]);
  }

  #[test]
  fn iou_equal_to_threshold_is_not_suppressed() {
    let boxes = [[0.0, 0.0, 9.0, 9.0], [5.0, 0.0, 14.0, 9.0]];
    let threshold = iou(&boxes[0], &boxes[1]);
    assert!((threshold - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(nms(&boxes, &[0.9, 0.8], threshold), vec![0, 1]);
    assert_eq!(nms(&boxes, &[0.9, 0.8], threshold - 1e-4), vec![0]);
  }

  #[test]
  fn empty_proposals_select_nothing() {
    let kept = select_regions(&RawProposalSet::default(), &config(0.2, 10, 100));
    assert!(kept.is_empty());
    assert!(kept.labels.is_empty());
    assert!(kept.boxes.is_empty());
    assert!(kept.confidences.is_empty());
  }

  #[test]
  fn running_confidence_ignores_suppressed_and_background() {
    let proposals = RawProposalSet {
      boxes: vec![[0.0, 0.0, 9.0, 9.0], [0.0, 0.0, 9.0, 9.0], [40.0, 40.0, 49.0, 49.0]],
      class_scores: vec![
        vec![0.95, 0.6, 0.1],
        vec![0.0, 0.5, 0.4],
        vec![0.99, 0.0, 0.0],
      ],
      features: vec![vec![]; 3],
    };
    let conf = running_confidence(&proposals, 0.5);
    // 第 1 类: 0 压掉 1；第 2 类: 1 压掉 0
    assert_eq!(conf, vec![0.6, 0.4, 0.0]);
  }

  #[test]
  fn labels_include_background_in_argmax() {
    let proposals = RawProposalSet {
      boxes: vec![[0.0, 0.0, 9.0, 9.0], [40.0, 40.0, 49.0, 49.0]],
      class_scores: vec![vec![0.7, 0.3, 0.0], vec![0.1, 0.2, 0.7]],
      features: vec![vec![1.0], vec![2.0]],
    };
    let kept = select_regions(&proposals, &config(0.0, 1, 10));
    assert_eq!(kept.indices, vec![0, 1]);
    assert_eq!(kept.labels, vec![0, 2]);
    assert_eq!(kept.confidences, vec![0.3, 0.7]);
    assert_eq!(kept.features, vec![vec![1.0], vec![2.0]]);
  }

  #[test]
  fn selection_matches_worked_examples_end_to_end() {
    let proposals = disjoint(&CONF);
    let kept = select_regions(&proposals, &config(0.2, 3, 4));
    assert_eq!(kept.indices, vec![0, 2, 3]);
    assert_eq!(kept.confidences, vec![0.9, 0.3, 0.25]);
    assert_eq!(kept.boxes[1], proposals.boxes[2]);

    let kept = select_regions(&proposals, &config(0.5, 3, 4));
    assert_eq!(kept.indices, vec![0, 2, 3]);

    let kept = select_regions(&proposals, &config(0.0, 1, 2));
    assert_eq!(kept.indices, vec![0, 2]);
  }

  #[test]
  fn selection_is_deterministic_and_bounded() {
    let scores: Vec<f32> = (0..40).map(|i| ((i * 37) % 11) as f32 / 10.0).collect();
    let proposals = disjoint(&scores);
    for (min, max) in [(0, 0), (1, 3), (5, 5), (10, 20), (50, 60)] {
      let cfg = config(0.45, min, max);
      let first = select_regions(&proposals, &cfg);
      let second = select_regions(&proposals, &cfg);
      assert_eq!(first, second);
      assert!(first.len() >= min.min(proposals.len()));
      assert!(first.len() <= max);
    }
  }
}
