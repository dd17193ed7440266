// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::config::settings::ProbeSettings;
use crate::utils::url_utils::{normalize_host, normalize_path};

/// 目标解析错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("empty input")]
    Empty,
    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid target `{input}`: {reason}")]
    Invalid { input: String, reason: String },
}

/// 协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn alternate(&self) -> Scheme {
        match self {
            Scheme::Http => Scheme::Https,
            Scheme::Https => Scheme::Http,
        }
    }

    fn parse(value: &str) -> Result<Self, TargetParseError> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(TargetParseError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 目标标识
///
/// 规范化后的 `METHOD scheme://host[:port]/path`，用作断点续扫和输入去重的键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TargetKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 探测目标
///
/// `scheme` 为 `None` 表示自动选择：先试首选协议，失败后回退
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// 原始输入
    pub input: String,
    pub scheme: Option<Scheme>,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub method: String,
    /// Host头覆盖
    pub vhost: Option<String>,
}

impl Target {
    /// 解析单行输入
    ///
    /// 支持 `host`、`host:port`、`scheme://host[:port][/path]`
    pub fn parse(input: &str) -> Result<Self, TargetParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TargetParseError::Empty);
        }

        let (scheme, url) = match trimmed.split_once("://") {
            Some((scheme, _)) => {
                let scheme = Scheme::parse(scheme)?;
                (Some(scheme), Url::parse(trimmed))
            }
            None => (None, Url::parse(&format!("http://{}", trimmed))),
        };
        let url = url.map_err(|e| TargetParseError::Invalid {
            input: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        let host = url
            .host_str()
            .map(normalize_host)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TargetParseError::Invalid {
                input: trimmed.to_string(),
                reason: "missing host".to_string(),
            })?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        // Url drops a port equal to the scheme default; for auto targets that
        // scheme was a placeholder, so recover an explicit `:80` from the input.
        let port = match (scheme, url.port()) {
            (_, Some(port)) => Some(port),
            (None, None) if has_explicit_port(trimmed, 80) => Some(80),
            _ => None,
        };

        Ok(Self {
            input: trimmed.to_string(),
            scheme,
            host,
            port,
            path: normalize_path(&path),
            method: "GET".to_string(),
            vhost: None,
        })
    }

    /// 根据探测配置把一行输入展开为多个目标
    ///
    /// 方法 × 路径 × 端口，输入里显式给出的端口优先于配置的端口列表
    pub fn expand(input: &str, probe: &ProbeSettings) -> Result<Vec<Self>, TargetParseError> {
        let base = Self::parse(input)?;

        let ports: Vec<Option<u16>> = if base.port.is_some() || probe.ports.is_empty() {
            vec![base.port]
        } else {
            probe.ports.iter().copied().map(Some).collect()
        };
        let paths: Vec<String> = if probe.paths.is_empty() {
            vec![base.path.clone()]
        } else {
            probe.paths.iter().map(|p| normalize_path(p)).collect()
        };

        let mut targets = Vec::with_capacity(probe.methods.len() * ports.len() * paths.len());
        for method in &probe.methods {
            for port in &ports {
                for path in &paths {
                    targets.push(Self {
                        port: *port,
                        path: path.clone(),
                        method: method.trim().to_ascii_uppercase(),
                        ..base.clone()
                    });
                }
            }
        }
        Ok(targets)
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    /// 目标标识
    pub fn key(&self) -> TargetKey {
        let scheme = self.scheme.map(|s| s.as_str()).unwrap_or("auto");
        let port = self
            .port
            .or_else(|| self.scheme.map(|s| s.default_port()))
            .map(|p| format!(":{}", p))
            .unwrap_or_default();
        TargetKey(format!(
            "{} {}://{}{}{}",
            self.method, scheme, self.host, port, self.path
        ))
    }

    /// 熔断器使用的主机键
    pub fn host_key(&self) -> &str {
        &self.host
    }

    /// 端口：未显式指定时取协议默认端口
    pub fn port_for(&self, scheme: Scheme) -> u16 {
        self.port.unwrap_or_else(|| scheme.default_port())
    }

    /// 按指定协议构造请求URL
    pub fn url_for(&self, scheme: Scheme) -> Result<Url, url::ParseError> {
        let port = self.port_for(scheme);
        let authority = if port == scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, port)
        };
        Url::parse(&format!("{}://{}{}", scheme.as_str(), authority, self.path))
    }

    /// 按顺序排列的待尝试协议
    pub fn candidate_schemes(&self, probe: &ProbeSettings) -> Vec<Scheme> {
        match self.scheme {
            Some(scheme) => {
                if probe.no_fallback || probe.no_fallback_scheme {
                    vec![scheme]
                } else {
                    vec![scheme, scheme.alternate()]
                }
            }
            None => {
                let preferred = match self.port {
                    Some(80) => Scheme::Http,
                    Some(443) => Scheme::Https,
                    _ if probe.prefer_https => Scheme::Https,
                    _ => Scheme::Http,
                };
                if probe.no_fallback {
                    vec![preferred]
                } else {
                    vec![preferred, preferred.alternate()]
                }
            }
        }
    }
}

fn has_explicit_port(input: &str, port: u16) -> bool {
    let authority = input.split(['/', '?']).next().unwrap_or(input);
    authority.ends_with(&format!(":{}", port))
}
