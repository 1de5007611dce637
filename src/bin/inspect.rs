// 该文件是 Quyu （区域特征） 项目的一部分。
// src/bin/inspect.rs - 查看提取结果
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use quyu::output::{ArchiveOutput, RecordFormat, RegionRecord};

/// 查看单图记录或分片归档
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 记录或归档文件路径（按扩展名识别格式）
  #[arg(value_name = "FILE")]
  pub path: PathBuf,

  /// 文件是分片归档
  #[arg(long)]
  pub archive: bool,

  /// 逐个打印区域
  #[arg(long)]
  pub verbose: bool,
}

fn print_record(record: &RegionRecord, verbose: bool) {
  let feature_dim = record.features.first().map(Vec::len).unwrap_or(0);
  println!(
    "{} (id: {}): {}x{}, {} 个区域, 特征维度 {}",
    record.image_name,
    record
      .image_id
      .map(|id| id.to_string())
      .unwrap_or_else(|| "-".to_string()),
    record.image_w,
    record.image_h,
    record.num_boxes,
    feature_dim
  );
  if verbose {
    for ((bbox, confidence), label) in record
      .boxes
      .iter()
      .zip(&record.confidences)
      .zip(&record.labels)
    {
      println!(
        "  - 类别 {}: {:.2}% at ({:.0}, {:.0}, {:.0}, {:.0})",
        label,
        confidence * 100.0,
        bbox[0],
        bbox[1],
        bbox[2],
        bbox[3]
      );
    }
  }
}

fn main() -> Result<()> {
  let args = Args::parse();

  if args.archive {
    let archive = ArchiveOutput::load(&args.path)
      .with_context(|| format!("无法读取归档: {}", args.path.display()))?;
    println!("归档 {}: {} 张图像", args.path.display(), archive.len());
    for record in archive.values() {
      print_record(record, args.verbose);
    }
  } else {
    let record: RegionRecord = RecordFormat::from_path(&args.path)?
      .read_file(&args.path)
      .with_context(|| format!("无法读取记录: {}", args.path.display()))?;
    print_record(&record, args.verbose);
  }

  Ok(())
}
