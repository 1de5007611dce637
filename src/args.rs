// 该文件是 Quyu （区域特征） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Parser, ValueEnum};
use thiserror::Error;
use url::Url;

use crate::{
  claim::ClaimPolicy,
  output::{OutputError, OutputLayout, RecordFormat},
  selector::SelectorConfig,
  shard::{ShardAssignment, ShardError},
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("分片配置错误: {0}")]
  Shard(#[from] ShardError),
  #[error("min_boxes ({min}) 不能大于 max_boxes ({max})")]
  BoxBounds { min: usize, max: usize },
  #[error("NMS 阈值必须在 [0, 1] 之间, 实际为 {0}")]
  NmsThreshold(f32),
  #[error("置信度阈值无效: {0}")]
  ConfThreshold(f32),
  #[error("无法从归档路径 {path} 判断格式: {source}")]
  ArchiveFormat {
    path: PathBuf,
    source: OutputError,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClaimMode {
  /// 检查后创建标记，无条件删除标记
  BestEffort,
  /// 带持有者与过期时间的租约
  Leased,
}

/// Quyu 区域特征提取参数配置
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 图像根目录（或单张图像文件）
  #[arg(long, env = "QUYU_INPUT", value_name = "DIR")]
  pub input: PathBuf,

  /// 图像文件名后缀
  #[arg(long, env = "QUYU_IMAGE_EXT", default_value = "jpg", value_name = "EXT")]
  pub image_ext: String,

  /// 输出目录，单图记录与认领标记都放在这里
  #[arg(long, env = "QUYU_OUTPUT_DIR", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 检测器地址，例如 proposals:///data/proposals
  #[arg(long, env = "QUYU_MODEL", value_name = "MODEL")]
  pub model: Url,

  /// 每张图像最少保留的区域数
  #[arg(long, env = "QUYU_MIN_BOXES", default_value = "10", value_name = "COUNT")]
  pub min_boxes: usize,

  /// 每张图像最多保留的区域数
  #[arg(long, env = "QUYU_MAX_BOXES", default_value = "100", value_name = "COUNT")]
  pub max_boxes: usize,

  /// 置信度阈值
  #[arg(long, env = "QUYU_CONF_THRESH", default_value = "0.2", value_name = "THRESHOLD")]
  pub conf_thresh: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "QUYU_NMS_THRESH", default_value = "0.3", value_name = "THRESHOLD")]
  pub nms_thresh: f32,

  /// 分片总数
  #[arg(long, env = "QUYU_TOTAL_SPLIT", default_value = "1", value_name = "COUNT")]
  pub total_split: usize,

  /// 本 worker 的分片序号，从 0 开始
  #[arg(long, env = "QUYU_CURRENT_SPLIT", default_value = "0", value_name = "INDEX")]
  pub current_split: usize,

  /// 把整个分片写进一个归档文件，而不是每张图像一个文件；
  /// 归档格式由扩展名决定（.json 或 .bin）
  #[arg(long, env = "QUYU_ARCHIVE", value_name = "FILE")]
  pub archive: Option<PathBuf>,

  /// 输出格式: json 或 bincode
  #[arg(long, env = "QUYU_FORMAT", default_value = "json", value_name = "FORMAT")]
  pub format: RecordFormat,

  /// bottom-up attention 导出的候选框 TSV 文件
  #[arg(long, env = "QUYU_BBOX_FILE", value_name = "FILE")]
  pub bbox_file: Option<PathBuf>,

  /// 不从文件名解析图像 ID
  #[arg(long, env = "QUYU_NO_ID")]
  pub no_id: bool,

  /// 认领方式
  #[arg(long, env = "QUYU_CLAIM", value_enum, default_value = "best-effort")]
  pub claim: ClaimMode,

  /// 租约有效期（秒），仅 leased 模式使用
  #[arg(long, env = "QUYU_LEASE_SECS", default_value = "3600", value_name = "SECONDS")]
  pub lease_secs: u64,

  /// worker 标识，默认为 主机名-进程号
  #[arg(long, env = "QUYU_WORKER_ID", value_name = "ID")]
  pub worker_id: Option<String>,

  /// 每遍历多少张图像输出一次进度
  #[arg(long, env = "QUYU_LOG_EVERY", default_value = "100", value_name = "COUNT")]
  pub log_every: usize,
}

/// 校验后的运行配置，启动后不再改变
#[derive(Debug, Clone)]
pub struct ExtractConfig {
  pub input: PathBuf,
  pub image_ext: String,
  pub with_id: bool,
  pub model: Url,
  pub shard: ShardAssignment,
  pub selector: SelectorConfig,
  pub layout: OutputLayout,
  pub archive: Option<PathBuf>,
  pub bbox_file: Option<PathBuf>,
  pub claim: ClaimPolicy,
  pub log_every: usize,
}

fn default_worker_id() -> String {
  let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
  format!("{}-{}", host, std::process::id())
}

impl Args {
  pub fn into_config(self) -> Result<ExtractConfig, ConfigError> {
    let shard = ShardAssignment::new(self.total_split, self.current_split)?;
    if self.min_boxes > self.max_boxes {
      return Err(ConfigError::BoxBounds {
        min: self.min_boxes,
        max: self.max_boxes,
      });
    }
    if !(0.0..=1.0).contains(&self.nms_thresh) {
      return Err(ConfigError::NmsThreshold(self.nms_thresh));
    }
    if self.conf_thresh.is_nan() {
      return Err(ConfigError::ConfThreshold(self.conf_thresh));
    }
    if let Some(path) = &self.archive
      && let Err(source) = RecordFormat::from_path(path)
    {
      return Err(ConfigError::ArchiveFormat {
        path: path.clone(),
        source,
      });
    }

    let claim = match self.claim {
      ClaimMode::BestEffort => ClaimPolicy::BestEffort,
      ClaimMode::Leased => ClaimPolicy::Leased {
        owner: self.worker_id.unwrap_or_else(default_worker_id),
        ttl_secs: self.lease_secs,
      },
    };

    Ok(ExtractConfig {
      input: self.input,
      image_ext: self.image_ext,
      with_id: !self.no_id,
      model: self.model,
      shard,
      selector: SelectorConfig {
        nms_threshold: self.nms_thresh,
        conf_threshold: self.conf_thresh,
        min_boxes: self.min_boxes,
        max_boxes: self.max_boxes,
      },
      layout: OutputLayout {
        output_dir: self.output_dir,
        format: self.format,
      },
      archive: self.archive,
      bbox_file: self.bbox_file,
      claim,
      log_every: self.log_every,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(extra: &[&str]) -> Args {
    let mut argv = vec![
      "quyu-extract",
      "--input",
      "/corpus",
      "--output-dir",
      "/out",
      "--model",
      "proposals:///props",
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
  }

  #[test]
  fn defaults_follow_extraction_settings() {
    let config = parse(&[]).into_config().unwrap();
    assert_eq!(config.image_ext, "jpg");
    assert!(config.with_id);
    assert_eq!(config.shard, ShardAssignment::new(1, 0).unwrap());
    assert_eq!(config.selector, SelectorConfig::default());
    assert_eq!(config.layout.format, RecordFormat::Json);
    assert_eq!(config.claim, ClaimPolicy::BestEffort);
    assert_eq!(config.log_every, 100);
    assert!(config.archive.is_none());
  }

  #[test]
  fn shard_index_must_be_below_total() {
    let err = parse(&["--total-split", "4", "--current-split", "4"])
      .into_config()
      .unwrap_err();
    assert!(matches!(
      err,
      ConfigError::Shard(ShardError::IndexOutOfRange { current: 4, total: 4 })
    ));
    assert!(parse(&["--total-split", "0"]).into_config().is_err());
  }

  #[test]
  fn box_bounds_and_thresholds_are_checked() {
    assert!(matches!(
      parse(&["--min-boxes", "20", "--max-boxes", "10"]).into_config(),
      Err(ConfigError::BoxBounds { min: 20, max: 10 })
    ));
    assert!(matches!(
      parse(&["--nms-thresh", "1.5"]).into_config(),
      Err(ConfigError::NmsThreshold(_))
    ));
  }

  #[test]
  fn archive_extension_must_name_a_format() {
    assert!(matches!(
      parse(&["--archive", "/out/shard0.pt"]).into_config(),
      Err(ConfigError::ArchiveFormat { .. })
    ));
    let config = parse(&["--archive", "/out/shard0.json"]).into_config().unwrap();
    assert_eq!(config.archive, Some(PathBuf::from("/out/shard0.json")));
  }

  #[test]
  fn leased_mode_carries_worker_id() {
    let config = parse(&["--claim", "leased", "--worker-id", "gpu-3", "--lease-secs", "60"])
      .into_config()
      .unwrap();
    assert_eq!(
      config.claim,
      ClaimPolicy::Leased {
        owner: "gpu-3".to_string(),
        ttl_secs: 60
      }
    );
  }

  #[test]
  fn missing_required_flags_fail_to_parse() {
    assert!(Args::try_parse_from(["quyu-extract", "--input", "/corpus"]).is_err());
  }
}
