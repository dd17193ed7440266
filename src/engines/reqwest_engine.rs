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

use crate::config::settings::ProbeSettings;
use crate::engines::traits::{HttpClient, HttpRequest, HttpResponse, ProbeError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use std::collections::BTreeMap;
use std::time::Instant;

/// HTTP探测引擎
///
/// 基于reqwest实现，所有探测共享一个连接池。
/// 重定向由探测流水线逐跳处理，这里只发送单个请求。
pub struct ReqwestEngine {
    client: reqwest::Client,
}

impl ReqwestEngine {
    /// 创建HTTP探测引擎
    ///
    /// # 参数
    ///
    /// * `settings` - 探测配置
    ///
    /// # 返回值
    ///
    /// * `Ok(ReqwestEngine)` - 引擎实例
    /// * `Err(ProbeError)` - 客户端构建失败
    pub fn new(settings: &ProbeSettings) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout())
            .connect_timeout(settings.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .tls_info(true)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ProbeError::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestEngine {
    /// 发送单个HTTP请求
    ///
    /// # 参数
    ///
    /// * `request` - HTTP请求
    ///
    /// # 返回值
    ///
    /// * `Ok(HttpResponse)` - 响应，响应体最多读取 `max_body` 字节
    /// * `Err(ProbeError)` - 连接、协议错误或超时
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        // Build headers
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(k, v);
            }
        }
        if let Some(host) = &request.host_header {
            let value = HeaderValue::from_str(host)
                .map_err(|e| ProbeError::Other(format!("invalid host header {}: {}", host, e)))?;
            headers.insert(HOST, value);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let mut response = builder.send().await?;

        let status_code = response.status().as_u16();
        let http2 = response.version() == reqwest::Version::HTTP_2;
        let remote_ip = response.remote_addr().map(|addr| addr.ip());
        let peer_certificate = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .map(|der| der.to_vec());

        let mut response_headers: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in response.headers() {
            let value = String::from_utf8_lossy(v.as_bytes()).into_owned();
            response_headers
                .entry(k.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await? {
            let remaining = request.max_body.saturating_sub(body.len());
            if chunk.len() > remaining {
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            url: request.url.to_string(),
            status_code,
            headers: response_headers,
            body,
            truncated,
            http2,
            remote_ip,
            peer_certificate,
            response_time: start.elapsed(),
        })
    }
}

#[cfg(test)]
#[path = "reqwest_engine_test.rs"]
mod tests;
