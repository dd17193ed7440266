// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

/// 配置错误类型
///
/// 在任何探测开始之前终止运行
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("配置加载失败: {0}")]
    Load(#[from] config::ConfigError),

    #[error("无效配置 `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("无效正则表达式 `{pattern}`: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("无效目标输入: {0}")]
    Input(String),
}

impl ConfigurationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 断点续扫文件加载错误
#[derive(Error, Debug)]
pub enum ResumeLoadError {
    #[error("无法读取断点文件 {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("断点文件已损坏 {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("断点文件与当前配置不匹配 (stored {stored}, current {current})")]
    FingerprintMismatch { stored: String, current: String },
}

/// 断点续扫文件写入错误
#[derive(Error, Debug)]
pub enum ResumeFlushError {
    #[error("无法写入断点文件 {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("序列化断点失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 结果输出错误
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("写入结果失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON序列化失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV序列化失败: {0}")]
    Csv(#[from] csv::Error),
}

/// Runner错误类型
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    ResumeLoad(#[from] ResumeLoadError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("初始化组件失败: {0}")]
    Init(String),
}
