// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::domain::models::probe_result::{AsnInfo, CdnInfo, DnsRecords, Technology, TlsData};

/// 探测错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// 连接失败（拒绝、重置、DNS解析失败、TLS握手失败）
    #[error("connection failed: {0}")]
    Connection(String),
    /// 协议错误
    #[error("protocol error: {0}")]
    Protocol(String),
    /// 超时
    #[error("timeout")]
    Timeout,
    /// 重定向错误（循环或超过最大次数）
    #[error("redirect error: {0}")]
    Redirect(String),
    /// 被取消
    #[error("cancelled")]
    Cancelled,
    /// 其他错误
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 连接级错误和超时返回true
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Connection(_) | ProbeError::Timeout)
    }

    /// 判断错误是否允许回退到另一种协议
    pub fn allows_fallback(&self) -> bool {
        self.counts_against_host()
    }

    /// 判断错误是否来自网络层，只有这类错误计入主机熔断
    pub fn counts_against_host(&self) -> bool {
        matches!(
            self,
            ProbeError::Connection(_) | ProbeError::Protocol(_) | ProbeError::Timeout
        )
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::Timeout
        } else if e.is_connect() {
            ProbeError::Connection(error_chain(&e))
        } else if e.is_redirect() {
            ProbeError::Redirect(error_chain(&e))
        } else if e.is_request() || e.is_body() || e.is_decode() {
            ProbeError::Protocol(error_chain(&e))
        } else {
            ProbeError::Other(error_chain(&e))
        }
    }
}

/// 把错误及其来源拼成一行，reqwest的顶层信息通常不包含根因
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// 渲染错误类型
///
/// 渲染失败不会让探测结果失败，只在结果中留下说明
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("browser unavailable: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("render timeout")]
    Timeout,
    #[error("renderer closed")]
    Closed,
}

/// HTTP请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub method: reqwest::Method,
    /// 请求头
    pub headers: BTreeMap<String, String>,
    /// Host头覆盖（虚拟主机探测）
    pub host_header: Option<String>,
    pub body: Option<String>,
    /// 超时时间
    pub timeout: Duration,
    /// 最大读取字节数
    pub max_body: usize,
}

/// HTTP响应
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub url: String,
    pub status_code: u16,
    /// 响应头，名称小写，重复的头以逗号合并
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// 响应体超过读取上限被截断
    pub truncated: bool,
    pub http2: bool,
    pub remote_ip: Option<IpAddr>,
    /// 服务端叶子证书（DER）
    pub peer_certificate: Option<Vec<u8>>,
    pub response_time: Duration,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 按UTF-8（有损）解码的响应体
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP客户端特质
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// 发送单个请求，不跟随重定向
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError>;
}

/// TLS探测特质
#[async_trait]
pub trait TlsProber: Send + Sync {
    /// 对 `host:port` 做TLS握手并返回证书信息
    async fn probe(
        &self,
        host: &str,
        port: u16,
        sni: Option<&str>,
        timeout: Duration,
    ) -> Result<TlsData, ProbeError>;
}

/// 渲染输出
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// 渲染后的DOM
    pub html: String,
    /// PNG截图
    pub screenshot: Option<Vec<u8>>,
}

/// 无头浏览器渲染特质
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderOutput, RenderError>;

    /// 释放浏览器资源
    async fn close(&self);
}

/// 技术识别特质
pub trait TechDetector: Send + Sync {
    fn detect(&self, headers: &BTreeMap<String, String>, body: &str) -> Vec<Technology>;
}

/// CDN/ASN识别特质
pub trait CdnResolver: Send + Sync {
    /// 判断IP是否属于已知CDN/WAF
    fn cdn(&self, ip: IpAddr) -> Option<CdnInfo>;

    /// 查询IP所属自治系统
    fn asn(&self, ip: IpAddr) -> Option<AsnInfo>;
}

/// DNS解析特质
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<DnsRecords, ProbeError>;
}
