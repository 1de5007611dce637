// 该文件是 Quyu （区域特征） 项目的一部分。
// src/task.rs - 分片提取任务
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

use std::sync::mpsc::Receiver;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::{
  claim::{self, Claim, ClaimMarker, ClaimPolicy, ClaimState},
  detector::{BoxFile, Detector, RawProposalSet},
  discovery::ImageRef,
  frame::ImageFrame,
  output::{OutputLayout, Persist, RegionRecord},
  selector::{SelectorConfig, select_regions},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 一次分片运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardReport {
  pub visited: usize,
  pub processed: usize,
  pub skipped_done: usize,
  pub skipped_busy: usize,
  pub unreadable: usize,
  pub detector_failed: usize,
  pub claim_failed: usize,
  pub interrupted: bool,
}

/// 逐张处理一个分片：跳过检查、解码、认领、检测、筛选、写出、释放。
/// 同一时刻只处理一张图像。
pub struct ShardTask {
  layout: OutputLayout,
  selector: SelectorConfig,
  claim: ClaimPolicy,
  boxes: Option<BoxFile>,
  log_every: usize,
  interrupt: Option<Receiver<()>>,
}

impl ShardTask {
  pub fn new(layout: OutputLayout, selector: SelectorConfig, claim: ClaimPolicy) -> Self {
    ShardTask {
      layout,
      selector,
      claim,
      boxes: None,
      log_every: 100,
      interrupt: None,
    }
  }

  pub fn with_boxes(mut self, boxes: Option<BoxFile>) -> Self {
    self.boxes = boxes;
    self
  }

  pub fn with_log_every(mut self, log_every: usize) -> Self {
    self.log_every = log_every.max(1);
    self
  }

  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  fn release(&self, marker: &ClaimMarker) {
    if let Err(e) = self.claim.release(marker) {
      warn!("释放标记失败 {}: {}", marker.path().display(), e);
    }
  }

  /// 调用检测器并校验候选数据形状，形状不一致按检测失败处理
  fn detect<M: Detector>(&self, model: &M, frame: &ImageFrame) -> anyhow::Result<RawProposalSet> {
    let external = self
      .boxes
      .as_ref()
      .zip(frame.source().image_id)
      .and_then(|(boxes, id)| boxes.get(id));
    let proposals = match external {
      Some(boxes) => {
        debug!("使用外部候选框 {} 个", boxes.len());
        model.detect_with_boxes(frame, boxes)?
      }
      None => model.detect(frame)?,
    };
    proposals.validate()?;
    Ok(proposals)
  }
}

impl<I, M, O> Task<I, M, O> for ShardTask
where
  I: IntoIterator<Item = ImageRef>,
  M: Detector,
  O: Persist,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = ShardReport;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, mut output: O) -> Result<Self::Output, Self::Error> {
    info!("开始分片任务...");
    let start = Instant::now();
    let mut report = ShardReport::default();

    for image in input {
      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        report.interrupted = true;
        break;
      }

      report.visited += 1;
      if report.visited % self.log_every == 0 {
        info!(
          "已遍历 {} 张图像, 处理 {} 张, 耗时 {:.1?}",
          report.visited,
          report.processed,
          start.elapsed()
        );
      }

      let artifact = self.layout.artifact_path(&image);
      let marker = ClaimMarker::for_artifact(&artifact);
      if claim::probe(&artifact, &marker) == ClaimState::Done {
        debug!("已完成，跳过: {}", image.path.display());
        report.skipped_done += 1;
        continue;
      }

      let frame = match ImageFrame::load(&image) {
        Ok(frame) => frame,
        Err(e) => {
          warn!("无法读取图像 {}: {}", image.path.display(), e);
          report.unreadable += 1;
          continue;
        }
      };

      match self.claim.claim(&artifact, &marker) {
        Ok(Claim::Acquired { created }) => {
          debug!("认领 {} (新建标记: {})", image.path.display(), created);
        }
        Ok(Claim::Done) => {
          report.skipped_done += 1;
          continue;
        }
        Ok(Claim::Busy { owner }) => {
          debug!("由 '{}' 处理中，跳过: {}", owner, image.path.display());
          report.skipped_busy += 1;
          continue;
        }
        Err(e) => {
          warn!("认领失败 {}: {}", image.path.display(), e);
          report.claim_failed += 1;
          continue;
        }
      }

      let proposals = match self.detect(&model, &frame) {
        Ok(proposals) => proposals,
        Err(e) => {
          warn!("检测失败 {}: {}", image.path.display(), e);
          report.detector_failed += 1;
          self.release(&marker);
          continue;
        }
      };

      let kept = select_regions(&proposals, &self.selector);
      let record = RegionRecord::new(&frame, kept);
      if let Err(e) = output.persist(&artifact, record) {
        // 保留标记，下次运行时该图像不会被当作已完成
        error!(
          "写出结果失败 {}: {}，保留标记 {}",
          artifact.display(),
          e,
          marker.path().display()
        );
        return Err(e.into());
      }
      self.release(&marker);
      report.processed += 1;
    }

    if report.interrupted {
      output.abandon()?;
    } else {
      output.finish()?;
    }

    info!(
      "分片任务结束，耗时 {:.1?}: 处理 {}, 已完成跳过 {}, 占用跳过 {}, 无法读取 {}, 检测失败 {}, 认领失败 {}",
      start.elapsed(),
      report.processed,
      report.skipped_done,
      report.skipped_busy,
      report.unreadable,
      report.detector_failed,
      report.claim_failed
    );
    Ok(report)
  }
}
