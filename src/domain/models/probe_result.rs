// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::models::target::Target;

/// 熔断跳过时写入结果的错误信息
pub const SKIPPED_HOST_ERRORS: &str = "skipped: host error threshold exceeded";

/// 重定向链中的一跳
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHop {
    pub url: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// TLS探测数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsData {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    /// 证书链（DER，base64编码），叶子证书在前
    pub certificate_chain: Vec<String>,
    /// 叶子证书SHA-256指纹
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_sha256: Option<String>,
    /// 协商参数
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub negotiated: BTreeMap<String, String>,
}

/// 识别出的技术
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub categories: Vec<String>,
}

/// CDN信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnInfo {
    pub name: String,
    /// cdn / waf / cloud
    pub kind: String,
}

/// 自治系统信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnInfo {
    pub number: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ranges: Vec<String>,
}

/// DNS记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecords {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub a: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aaaa: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cname: Vec<String>,
}

/// 响应哈希
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHashes {
    pub body_sha256: String,
    pub body_mmh3: String,
    pub header_sha256: String,
    /// 渲染结果的SimHash，用于近似重复聚类
    pub simhash: u64,
}

/// 单个目标的探测结果
///
/// 创建后不再修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub input: String,
    /// 目标标识
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    pub status_code: u16,
    pub content_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webserver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub response_time_ms: u64,
    pub lines: usize,
    pub words: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub body_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless_body: Option<String>,
    /// 截图（base64）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub chain: Vec<ChainHop>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub chain_status_codes: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsData>,
    pub http2: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsRecords>,
    pub cdn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn_info: Option<CdnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<AsnInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub technologies: Vec<Technology>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extracts: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<ResponseHashes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon_mmh3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<u64>,
    pub failed: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// 以目标信息为基础创建结果
    pub fn for_target(target: &Target) -> Self {
        Self {
            timestamp: Utc::now(),
            input: target.input.clone(),
            key: target.key().to_string(),
            scheme: target
                .scheme
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            host: target.host.clone(),
            port: target.port.unwrap_or_default(),
            path: target.path.clone(),
            method: target.method.clone(),
            vhost: target.vhost.clone(),
            ..Default::default()
        }
    }

    /// 探测失败的结果
    pub fn failure(target: &Target, url: Option<String>, error: impl Into<String>) -> Self {
        let mut result = Self::for_target(target);
        result.url = url.unwrap_or_else(|| target.input.clone());
        result.failed = true;
        result.error = Some(error.into());
        result
    }

    /// 因主机熔断而跳过的结果
    pub fn skipped(target: &Target) -> Self {
        let mut result = Self::for_target(target);
        result.url = target.input.clone();
        result.skipped = true;
        result.error = Some(SKIPPED_HOST_ERRORS.to_string());
        result
    }

    /// 是否为成功获取到HTTP响应的结果
    pub fn is_success(&self) -> bool {
        !self.failed && !self.skipped
    }
}
