// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::stream::{self, Stream};
use metrics::counter;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

use crate::config::settings::{InputSettings, ProbeSettings};
use crate::domain::models::target::{Target, TargetParseError};
use crate::utils::errors::ConfigurationError;

type LineReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// 目标来源
///
/// 先产出内联目标，再逐行读取目标文件（`-` 表示stdin）。每一行按探测配置
/// 展开为多个目标，只在需要时读取下一行。
pub struct TargetSource {
    inline: VecDeque<String>,
    lines: Option<LineReader>,
    pending: VecDeque<Target>,
    probe: ProbeSettings,
    invalid: u64,
}

impl TargetSource {
    /// 打开输入
    ///
    /// # 返回值
    ///
    /// * `Ok(TargetSource)` - 目标来源
    /// * `Err(ConfigurationError)` - 目标文件无法打开
    pub async fn open(
        input: &InputSettings,
        probe: &ProbeSettings,
    ) -> Result<Self, ConfigurationError> {
        let lines = match input.file.as_deref() {
            None => None,
            Some("-") => {
                let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(tokio::io::stdin());
                Some(BufReader::new(reader))
            }
            Some(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    ConfigurationError::Input(format!("cannot open target file {}: {}", path, e))
                })?;
                let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(file);
                Some(BufReader::new(reader))
            }
        };

        Ok(Self {
            inline: input.targets.iter().cloned().collect(),
            lines,
            pending: VecDeque::new(),
            probe: probe.clone(),
            invalid: 0,
        })
    }

    /// 只包含给定输入行的目标来源
    pub fn from_lines<I, S>(lines: I, probe: &ProbeSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inline: lines.into_iter().map(Into::into).collect(),
            lines: None,
            pending: VecDeque::new(),
            probe: probe.clone(),
            invalid: 0,
        }
    }

    /// 下一个目标，输入耗尽时返回 `None`
    pub async fn next_target(&mut self) -> Option<Target> {
        loop {
            if let Some(target) = self.pending.pop_front() {
                counter!("targets_total").increment(1);
                return Some(target);
            }
            let line = self.next_line().await?;
            match Target::expand(&line, &self.probe) {
                Ok(targets) => self.pending.extend(targets),
                Err(TargetParseError::Empty) => {}
                Err(e) => {
                    self.invalid += 1;
                    warn!(input = %line, "Skipping invalid target: {}", e);
                }
            }
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.inline.pop_front() {
            return Some(line);
        }
        let reader = self.lines.as_mut()?;
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => {
                    debug!("Target file exhausted");
                    self.lines = None;
                    return None;
                }
                Ok(_) => {
                    // a bad line only costs that line
                    let Ok(line) = std::str::from_utf8(&raw) else {
                        self.invalid += 1;
                        warn!(
                            input = %String::from_utf8_lossy(&raw).trim(),
                            "Skipping target line that is not valid UTF-8"
                        );
                        continue;
                    };
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    return Some(line.to_string());
                }
                Err(e) => {
                    warn!("Stopped reading targets: {}", e);
                    self.lines = None;
                    return None;
                }
            }
        }
    }

    /// 被跳过的无效输入行数
    pub fn invalid_count(&self) -> u64 {
        self.invalid
    }

    /// 转换为惰性目标流
    pub fn into_stream(self) -> impl Stream<Item = Target> + Send + 'static {
        stream::unfold(self, |mut source| async move {
            let target = source.next_target().await?;
            Some((target, source))
        })
    }
}
