// 该文件是 Quyu （区域特征） 项目的一部分。
// src/claim.rs - 文件系统认领标记
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

//! 多个互不通信的 worker 通过共享文件系统上的目录标记认领图像。
//!
//! 每张图像的状态只由两个路径决定：
//!
//! | 标记 | 输出 | 状态 |
//! |------|------|------|
//! | 无   | 有   | `Done`      |
//! | 无   | 无   | `Unclaimed` |
//! | 有   | 任意 | `Claimed`   |
//!
//! [`ClaimPolicy::BestEffort`] 原样保留旧协议：先检查是否存在再创建目录，
//! 两步之间没有原子性，并发 worker 可能重复计算同一张图像；
//! 释放时无条件删除标记，即使标记不是自己创建的，也会提前释放别人的认领。
//! 这些竞争不视为错误。
//!
//! [`ClaimPolicy::Leased`] 在标记目录里写入 `lease.json`（持有者与过期时间）：
//! 未过期且属于别人的标记会让本 worker 跳过该图像，过期的租约可以被接管，
//! 释放时只删除自己持有的标记。崩溃留下的孤儿标记在租约过期后自动恢复。

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MARKER_SUFFIX: &str = "lock";
const LEASE_FILE: &str = "lease.json";

#[derive(Error, Debug)]
pub enum ClaimError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("租约序列化错误: {0}")]
  LeaseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
  Unclaimed,
  Claimed,
  Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimPolicy {
  BestEffort,
  Leased { owner: String, ttl_secs: u64 },
}

/// 认领判断的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
  /// 输出已存在且没有标记，直接跳过
  Done,
  /// 标记由其他 worker 持有且租约未过期
  Busy { owner: String },
  /// 可以处理；`created` 表示标记是本次新建的
  Acquired { created: bool },
}

/// 租约内容，时间为 Unix 毫秒
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
  pub owner: String,
  pub created_at: i64,
  pub expires_at: i64,
}

impl Lease {
  fn new(owner: &str, ttl_secs: u64) -> Self {
    let now = Utc::now().timestamp_millis();
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    Lease {
      owner: owner.to_string(),
      created_at: now,
      expires_at: now.saturating_add(ttl_ms),
    }
  }

  pub fn is_expired(&self) -> bool {
    Utc::now().timestamp_millis() >= self.expires_at
  }
}

/// 输出文件旁边的 `<输出路径>.lock` 目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMarker {
  path: PathBuf,
}

impl ClaimMarker {
  pub fn for_artifact(artifact: &Path) -> Self {
    let mut path = artifact.as_os_str().to_owned();
    path.push(".");
    path.push(MARKER_SUFFIX);
    ClaimMarker {
      path: PathBuf::from(path),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn exists(&self) -> bool {
    self.path.exists()
  }

  fn lease_path(&self) -> PathBuf {
    self.path.join(LEASE_FILE)
  }

  /// 读取租约；没有租约文件（旧协议的标记或租约尚未写完）时，
  /// 用目录修改时间加 `ttl_secs` 推算一个
  fn read_lease(&self, ttl_secs: u64) -> Result<Lease, ClaimError> {
    match fs::read(self.lease_path()) {
      Ok(data) => {
        if let Ok(lease) = serde_json::from_slice::<Lease>(&data) {
          return Ok(lease);
        }
        debug!("租约文件无法解析: {}", self.lease_path().display());
      }
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    let modified: DateTime<Utc> = fs::metadata(&self.path)?.modified()?.into();
    let created_at = modified.timestamp_millis();
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    Ok(Lease {
      owner: String::new(),
      created_at,
      expires_at: created_at.saturating_add(ttl_ms),
    })
  }

  fn write_lease(&self, lease: &Lease) -> Result<(), ClaimError> {
    fs::write(self.lease_path(), serde_json::to_vec(lease)?)?;
    Ok(())
  }
}

/// 只看文件系统判断一张图像的状态
pub fn probe(artifact: &Path, marker: &ClaimMarker) -> ClaimState {
  if marker.exists() {
    ClaimState::Claimed
  } else if artifact.exists() {
    ClaimState::Done
  } else {
    ClaimState::Unclaimed
  }
}

impl ClaimPolicy {
  /// 判断是否处理 `artifact` 对应的图像，需要时创建标记
  pub fn claim(&self, artifact: &Path, marker: &ClaimMarker) -> Result<Claim, ClaimError> {
    if probe(artifact, marker) == ClaimState::Done {
      return Ok(Claim::Done);
    }

    match self {
      ClaimPolicy::BestEffort => {
        if marker.exists() {
          debug!("标记已存在，仍然重新处理: {}", marker.path().display());
          return Ok(Claim::Acquired { created: false });
        }
        match fs::create_dir(marker.path()) {
          Ok(()) => Ok(Claim::Acquired { created: true }),
          Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!("标记在检查后被他人创建: {}", marker.path().display());
            Ok(Claim::Acquired { created: false })
          }
          Err(e) => Err(e.into()),
        }
      }
      ClaimPolicy::Leased { owner, ttl_secs } => match fs::create_dir(marker.path()) {
        Ok(()) => {
          marker.write_lease(&Lease::new(owner, *ttl_secs))?;
          Ok(Claim::Acquired { created: true })
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          let lease = marker.read_lease(*ttl_secs)?;
          if lease.owner != *owner && !lease.is_expired() {
            return Ok(Claim::Busy { owner: lease.owner });
          }
          if lease.owner != *owner {
            warn!(
              "接管过期的认领: {} (原持有者 '{}')",
              marker.path().display(),
              lease.owner
            );
          }
          marker.write_lease(&Lease::new(owner, *ttl_secs))?;
          Ok(Claim::Acquired { created: false })
        }
        Err(e) => Err(e.into()),
      },
    }
  }

  /// 释放标记。标记已不存在时静默返回。
  pub fn release(&self, marker: &ClaimMarker) -> Result<(), ClaimError> {
    if let ClaimPolicy::Leased { owner, ttl_secs } = self {
      match marker.read_lease(*ttl_secs) {
        Ok(lease) if lease.owner != *owner => {
          warn!(
            "标记已被 '{}' 接管，不删除: {}",
            lease.owner,
            marker.path().display()
          );
          return Ok(());
        }
        Ok(_) => {}
        Err(ClaimError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
          debug!("标记已不存在: {}", marker.path().display());
          return Ok(());
        }
        Err(e) => return Err(e),
      }
    }

    match fs::remove_dir_all(marker.path()) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => {
        debug!("标记已被他人删除: {}", marker.path().display());
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }
}
