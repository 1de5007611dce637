// 该文件是 Quyu （区域特征） 项目的一部分。
// src/bin/extract.rs - 分片区域特征提取 worker
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

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quyu::{
  FromUrl,
  args::Args,
  detector::{BoxFile, DetectorWrapper},
  discovery::discover_images,
  output::{ArchiveOutput, DirectoryRecordOutput, OutputWrapper},
  task::{ShardTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let config = args.into_config().context("配置无效")?;

  info!("图像目录: {}", config.input.display());
  info!("输出目录: {}", config.layout.output_dir.display());
  info!("检测器地址: {}", config.model);
  info!(
    "分片: {}/{}",
    config.shard.current_split(),
    config.shard.total_split()
  );
  info!("筛选参数: {:?}", config.selector);
  info!("认领方式: {:?}", config.claim);

  let model = DetectorWrapper::from_url(&config.model).context("无法创建检测器")?;
  let boxes = config
    .bbox_file
    .as_deref()
    .map(BoxFile::load)
    .transpose()
    .context("无法加载候选框文件")?;

  let images = discover_images(&config.input, &config.image_ext, config.with_id)?;
  let shard = config.shard.select(&images).to_vec();
  info!(
    "分片 {}: 共 {} 张图像中的 {} 张",
    config.shard.current_split(),
    images.len(),
    shard.len()
  );

  let output = match &config.archive {
    Some(path) => {
      info!("单文件归档模式: {}", path.display());
      // 归档模式下输出目录只存放认领标记
      std::fs::create_dir_all(&config.layout.output_dir)?;
      OutputWrapper::Archive(ArchiveOutput::for_path(path.clone())?)
    }
    None => OutputWrapper::DirectoryRecord(DirectoryRecordOutput::new(
      config.layout.output_dir.clone(),
      config.layout.format,
    )?),
  };

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，处理完当前图像后退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理器")?;

  let report = ShardTask::new(config.layout, config.selector, config.claim)
    .with_boxes(boxes)
    .with_log_every(config.log_every)
    .with_interrupt(rx)
    .run_task(shard, model, output)?;

  info!("处理完成: {:?}", report);
  if report.interrupted {
    std::process::exit(130);
  }
  Ok(())
}
