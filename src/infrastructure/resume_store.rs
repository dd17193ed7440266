// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::models::target::TargetKey;
use crate::utils::errors::{ResumeFlushError, ResumeLoadError};

/// 断点文件格式版本
pub const CHECKPOINT_VERSION: u32 = 1;

/// 断点文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    pub version: u32,
    /// 生成断点时的配置指纹
    pub options_fingerprint: String,
    /// 已完成的目标标识
    pub completed: BTreeSet<TargetKey>,
    pub updated_at: DateTime<Utc>,
}

/// 断点续扫存储
///
/// 记录已完成的目标标识，周期性原子写盘（临时文件 + rename）。
/// 只有产出了最终结果的目标才会被标记完成，被取消的探测不会写入。
pub struct ResumeStore {
    path: PathBuf,
    fingerprint: String,
    completed: Mutex<BTreeSet<TargetKey>>,
    dirty: AtomicBool,
    flush_lock: tokio::sync::Mutex<()>,
}

impl ResumeStore {
    /// 创建一个空的断点存储
    pub fn fresh(path: impl Into<PathBuf>, fingerprint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fingerprint: fingerprint.into(),
            completed: Mutex::new(BTreeSet::new()),
            dirty: AtomicBool::new(false),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 加载断点文件
    ///
    /// # 参数
    ///
    /// * `path` - 断点文件路径
    /// * `fingerprint` - 当前配置指纹
    /// * `required` - 为true时，损坏或不匹配的断点文件直接报错
    ///
    /// # 返回值
    ///
    /// 文件不存在时返回空存储；文件不可用且非必需时记录警告并返回空存储
    pub async fn load(
        path: impl AsRef<Path>,
        fingerprint: &str,
        required: bool,
    ) -> Result<Self, ResumeLoadError> {
        let path = path.as_ref();
        let store = Self::fresh(path, fingerprint);

        match read_checkpoint(path, fingerprint).await {
            Ok(Some(checkpoint)) => {
                info!(
                    path = %path.display(),
                    completed = checkpoint.completed.len(),
                    "Loaded resume checkpoint"
                );
                *store.completed.lock() = checkpoint.completed;
                Ok(store)
            }
            Ok(None) => {
                debug!(path = %path.display(), "No resume checkpoint found, starting fresh");
                Ok(store)
            }
            Err(e) if required => Err(e),
            Err(e) => {
                warn!(error = %e, "Ignoring unusable resume checkpoint, starting fresh");
                Ok(store)
            }
        }
    }

    /// 标记目标已完成
    pub fn mark_complete(&self, key: &TargetKey) {
        if self.completed.lock().insert(key.clone()) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// 目标是否已在之前的运行中完成
    pub fn should_skip(&self, key: &TargetKey) -> bool {
        self.completed.lock().contains(key)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 把当前状态写入磁盘
    ///
    /// 并发调用会被串行化；没有新完成的目标时跳过写入
    pub async fn flush(&self) -> Result<(), ResumeFlushError> {
        let _guard = self.flush_lock.lock().await;
        let unchanged = !self.dirty.swap(false, Ordering::AcqRel);
        if unchanged && fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }

        let checkpoint = ResumeCheckpoint {
            version: CHECKPOINT_VERSION,
            options_fingerprint: self.fingerprint.clone(),
            completed: self.completed.lock().clone(),
            updated_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&checkpoint)?;

        if let Err(e) = write_atomically(&self.path, &data).await {
            // keep the state dirty so the next flush retries
            self.dirty.store(true, Ordering::Release);
            return Err(ResumeFlushError::Io {
                path: self.path.display().to_string(),
                source: e,
            });
        }

        counter!("resume_checkpoints_total").increment(1);
        debug!(
            path = %self.path.display(),
            completed = checkpoint.completed.len(),
            "Flushed resume checkpoint"
        );
        Ok(())
    }

    /// 启动周期性写盘任务，直到取消令牌触发
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "Periodic resume flush failed");
                        }
                    }
                }
            }
        })
    }
}

async fn read_checkpoint(
    path: &Path,
    fingerprint: &str,
) -> Result<Option<ResumeCheckpoint>, ResumeLoadError> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ResumeLoadError::Io {
                path: path.display().to_string(),
                source: e,
            })
        }
    };

    let checkpoint: ResumeCheckpoint =
        serde_json::from_slice(&data).map_err(|source| ResumeLoadError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;

    if checkpoint.options_fingerprint != fingerprint {
        return Err(ResumeLoadError::FingerprintMismatch {
            stored: checkpoint.options_fingerprint,
            current: fingerprint.to_string(),
        });
    }

    Ok(Some(checkpoint))
}

async fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await
}
