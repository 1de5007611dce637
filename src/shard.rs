// 该文件是 Quyu （区域特征） 项目的一部分。
// src/shard.rs - 分片划分
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

use std::ops::Range;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShardError {
  #[error("分片总数必须大于 0")]
  ZeroShards,
  #[error("分片序号 {current} 超出分片总数 {total}")]
  IndexOutOfRange { current: usize, total: usize },
}

/// worker 启动时确定的分片，运行期间不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
  total_split: usize,
  current_split: usize,
}

impl ShardAssignment {
  pub fn new(total_split: usize, current_split: usize) -> Result<Self, ShardError> {
    if total_split == 0 {
      return Err(ShardError::ZeroShards);
    }
    if current_split >= total_split {
      return Err(ShardError::IndexOutOfRange {
        current: current_split,
        total: total_split,
      });
    }
    Ok(ShardAssignment {
      total_split,
      current_split,
    })
  }

  pub fn total_split(&self) -> usize {
    self.total_split
  }

  pub fn current_split(&self) -> usize {
    self.current_split
  }

  /// 本分片在长度为 `len` 的有序列表中的区间。
  /// 各分片大小最多相差 1，多出来的元素依次分给序号靠前的分片。
  pub fn range(&self, len: usize) -> Range<usize> {
    let base = len / self.total_split;
    let surplus = len % self.total_split;
    let i = self.current_split;
    let start = i * base + i.min(surplus);
    let size = base + usize::from(i < surplus);
    start..start + size
  }

  pub fn select<'a, T>(&self, items: &'a [T]) -> &'a [T] {
    &items[self.range(items.len())]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ten_images_three_shards() {
    let sizes: Vec<_> = (0..3)
      .map(|i| ShardAssignment::new(3, i).unwrap().range(10))
      .collect();
    assert_eq!(sizes, vec![0..4, 4..7, 7..10]);
  }

  #[test]
  fn shards_partition_the_list() {
    let items: Vec<usize> = (0..23).collect();
    for total in 1..=30 {
      let mut joined = Vec::new();
      let mut lens = Vec::new();
      for i in 0..total {
        let shard = ShardAssignment::new(total, i).unwrap().select(&items);
        lens.push(shard.len());
        joined.extend_from_slice(shard);
      }
      assert_eq!(joined, items, "total_split = {}", total);
      let max = *lens.iter().max().unwrap();
      let min = *lens.iter().min().unwrap();
      assert!(max - min <= 1);
      assert!(lens.windows(2).all(|w| w[0] >= w[1]));
    }
  }

  #[test]
  fn more_shards_than_items_leaves_empty_tails() {
    let shard = ShardAssignment::new(5, 4).unwrap();
    assert_eq!(shard.range(3), 3..3);
    assert_eq!(ShardAssignment::new(5, 2).unwrap().range(3), 2..3);
  }

  #[test]
  fn invalid_assignments_are_rejected() {
    assert_eq!(ShardAssignment::new(0, 0), Err(ShardError::ZeroShards));
    assert_eq!(
      ShardAssignment::new(3, 3),
      Err(ShardError::IndexOutOfRange {
        current: 3,
        total: 3
      })
    );
  }
}
