// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::settings::{ProbeSettings, RenderSettings, Settings};
use crate::domain::models::probe_result::{ChainHop, ProbeResult, ResponseHashes};
use crate::domain::models::target::{Scheme, Target};
use crate::domain::services::filter_service::ResultFilter;
use crate::domain::services::hash_service::{
    body_preview, count_lines, count_words, favicon_hash, header_hash, murmur3_32, sha256_hex,
    simhash, simhash_document, summarize_html,
};
use crate::engines::circuit_breaker::HostErrorBreaker;
use crate::engines::rate_limiter::RateLimiter;
use crate::engines::tls_prober::tls_data;
use crate::engines::traits::{
    CdnResolver, DnsResolver, HttpClient, HttpRequest, HttpResponse, ProbeError, Renderer,
    TechDetector, TlsProber,
};
use crate::utils::errors::ConfigurationError;
use crate::utils::retry_policy::RetryPolicy;
use crate::utils::url_utils::{resolve_url, same_host};

/// CDN主机在非标准端口上被跳过时的说明
pub const SKIPPED_CDN_PORT: &str = "skipped: cdn host on non-standard port";

/// 单条结果及其过滤结论
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    /// 被匹配/过滤条件抑制，不输出但仍计入完成
    pub suppressed: bool,
    /// 响应带有正文；没有正文的结果不按完全重复抑制
    pub has_body: bool,
}

/// 一个目标的探测结果
#[derive(Debug, Clone, Default)]
pub struct PipelineRun {
    /// 每个Host头变体一条
    pub outcomes: Vec<ProbeOutcome>,
    /// 探测被取消，目标不能标记为完成
    pub cancelled: bool,
}

impl PipelineRun {
    fn cancelled() -> Self {
        Self {
            outcomes: Vec::new(),
            cancelled: true,
        }
    }
}

/// 成功拿到首个响应
struct Fetched {
    scheme: Scheme,
    url: Url,
    request: HttpRequest,
    response: HttpResponse,
}

/// 跟随重定向后的最终状态
struct Followed {
    final_url: Url,
    response: HttpResponse,
    chain: Vec<ChainHop>,
    elapsed: Duration,
    error: Option<ProbeError>,
}

/// 探测流水线
///
/// 对单个目标依次执行：协议选择、Host头变体、连接/TLS、请求与重定向、
/// 可选渲染、技术识别、哈希和过滤。每个访问网络的步骤都先从全局限速器取令牌。
pub struct ProbePipeline {
    probe: ProbeSettings,
    render: RenderSettings,
    http: Arc<dyn HttpClient>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<HostErrorBreaker>,
    filter: Arc<ResultFilter>,
    retry: RetryPolicy,
    extractors: Vec<(String, Regex)>,
    tls_prober: Option<Arc<dyn TlsProber>>,
    renderer: Option<Arc<dyn Renderer>>,
    tech_detector: Option<Arc<dyn TechDetector>>,
    cdn_resolver: Option<Arc<dyn CdnResolver>>,
    dns_resolver: Option<Arc<dyn DnsResolver>>,
}

impl ProbePipeline {
    /// 创建探测流水线
    ///
    /// # 参数
    ///
    /// * `settings` - 应用配置
    /// * `http` - HTTP客户端
    /// * `limiter` - 全局限速器
    /// * `breaker` - 主机错误熔断器
    /// * `filter` - 编译后的结果过滤器
    ///
    /// # 返回值
    ///
    /// * `Ok(ProbePipeline)` - 流水线实例
    /// * `Err(ConfigurationError)` - 提取正则无效
    pub fn new(
        settings: &Settings,
        http: Arc<dyn HttpClient>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<HostErrorBreaker>,
        filter: Arc<ResultFilter>,
    ) -> Result<Self, ConfigurationError> {
        let extractors = settings
            .probe
            .extract_regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|re| (pattern.clone(), re))
                    .map_err(|source| ConfigurationError::Regex {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            probe: settings.probe.clone(),
            render: settings.render.clone(),
            http,
            limiter,
            breaker,
            filter,
            retry: RetryPolicy::new(settings.probe.retries),
            extractors,
            tls_prober: None,
            renderer: None,
            tech_detector: None,
            cdn_resolver: None,
            dns_resolver: None,
        })
    }

    pub fn with_tls_prober(mut self, prober: Arc<dyn TlsProber>) -> Self {
        self.tls_prober = Some(prober);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_tech_detector(mut self, detector: Arc<dyn TechDetector>) -> Self {
        self.tech_detector = Some(detector);
        self
    }

    pub fn with_cdn_resolver(mut self, resolver: Arc<dyn CdnResolver>) -> Self {
        self.cdn_resolver = Some(resolver);
        self
    }

    pub fn with_dns_resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.dns_resolver = Some(resolver);
        self
    }

    /// 探测单个目标
    ///
    /// 所有允许的协议都失败时产出错误结果，并为该目标向熔断器记录一次失败
    pub async fn run(&self, target: &Target, cancel: &CancellationToken) -> PipelineRun {
        if cancel.is_cancelled() {
            return PipelineRun::cancelled();
        }

        match self.is_excluded_cdn(target).await {
            Ok(true) => {
                let mut result = ProbeResult::for_target(target);
                result.url = target.input.clone();
                result.skipped = true;
                result.error = Some(SKIPPED_CDN_PORT.to_string());
                return PipelineRun {
                    outcomes: vec![ProbeOutcome {
                        result,
                        suppressed: false,
                        has_body: false,
                    }],
                    cancelled: false,
                };
            }
            Ok(false) => {}
            Err(ProbeError::Cancelled) => return PipelineRun::cancelled(),
            Err(e) => debug!(host = %target.host, "CDN pre-check failed: {}", e),
        }

        let variations: Vec<Option<String>> = if target.vhost.is_none() && self.probe.vhosts.is_empty() {
            vec![None]
        } else {
            target
                .vhost
                .iter()
                .chain(self.probe.vhosts.iter())
                .map(|v| Some(v.clone()))
                .collect()
        };

        let mut schemes = target.candidate_schemes(&self.probe);
        let mut outcomes = Vec::with_capacity(variations.len());
        let mut host_failed = false;

        for vhost in variations {
            let target = match vhost {
                Some(vhost) => target.clone().with_vhost(vhost),
                None => target.clone(),
            };

            let fetched = match self.fetch(&target, &schemes, cancel).await {
                Ok(fetched) => fetched,
                Err((_, ProbeError::Cancelled)) => return PipelineRun::cancelled(),
                Err((url, error)) => {
                    debug!(target = %target.key(), error = %error, "Probe failed");
                    host_failed |= error.counts_against_host();
                    outcomes.push(ProbeOutcome {
                        result: ProbeResult::failure(
                            &target,
                            url.map(|u| u.to_string()),
                            error.to_string(),
                        ),
                        suppressed: false,
                        has_body: false,
                    });
                    continue;
                }
            };
            // remaining variations reuse the scheme that answered
            schemes = vec![fetched.scheme];

            match self.complete(&target, fetched, cancel).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => return PipelineRun::cancelled(),
            }
        }

        if host_failed {
            self.breaker.record_failure(target.host_key());
        }

        PipelineRun {
            outcomes,
            cancelled: false,
        }
    }

    /// exclude_cdn：CDN主机只探测80/443端口
    async fn is_excluded_cdn(&self, target: &Target) -> Result<bool, ProbeError> {
        let Some(resolver) = &self.cdn_resolver else {
            return Ok(false);
        };
        let port = match target.port {
            Some(port) if self.probe.exclude_cdn && port != 80 && port != 443 => port,
            _ => return Ok(false),
        };

        let ip = tokio::net::lookup_host((target.host.as_str(), port))
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?
            .next()
            .map(|addr| addr.ip());
        Ok(ip.is_some_and(|ip| resolver.cdn(ip).is_some()))
    }

    /// 按顺序尝试各协议，返回第一个成功的响应
    async fn fetch(
        &self,
        target: &Target,
        schemes: &[Scheme],
        cancel: &CancellationToken,
    ) -> Result<Fetched, (Option<Url>, ProbeError)> {
        let mut last: (Option<Url>, ProbeError) =
            (None, ProbeError::Other("no scheme to probe".to_string()));

        for (index, scheme) in schemes.iter().enumerate() {
            let url = target
                .url_for(*scheme)
                .map_err(|e| (None, ProbeError::Other(format!("invalid url: {}", e))))?;
            let request = self.request_for(target, url.clone());

            match self.send_with_retries(&request, cancel).await {
                Ok(response) => {
                    return Ok(Fetched {
                        scheme: *scheme,
                        url,
                        request,
                        response,
                    })
                }
                Err(ProbeError::Cancelled) => return Err((Some(url), ProbeError::Cancelled)),
                Err(e) if e.allows_fallback() && index + 1 < schemes.len() => {
                    debug!(url = %url, error = %e, "Falling back to alternate scheme");
                    last = (Some(url), e);
                }
                Err(e) => return Err((Some(url), e)),
            }
        }
        Err(last)
    }

    fn request_for(&self, target: &Target, url: Url) -> HttpRequest {
        let method = reqwest::Method::from_bytes(target.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        HttpRequest {
            url,
            method,
            headers: self.probe.headers.clone(),
            host_header: target.vhost.clone(),
            body: self.probe.body.clone(),
            timeout: self.probe.timeout(),
            max_body: self.probe.max_body_read,
        }
    }

    /// 发送请求，连接级错误和超时按重试策略重试（不退避）
    async fn send_with_retries(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ProbeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.acquire(cancel).await?;
            match self.guarded(cancel, self.http.send(request)).await {
                Ok(response) => return Ok(response),
                Err(e) if self.retry.should_retry_with_error(attempt, &e) => {
                    debug!(url = %request.url, attempt, error = %e, "Retrying probe");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ProbeError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            acquired = self.limiter.acquire() => acquired.map_err(|_| ProbeError::Cancelled),
        }
    }

    async fn guarded<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T, ProbeError>
    where
        F: Future<Output = Result<T, ProbeError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            outcome = fut => outcome,
        }
    }

    /// 手动跟随重定向，记录完整状态码链
    async fn follow(
        &self,
        fetched: &Fetched,
        cancel: &CancellationToken,
    ) -> Result<Followed, ProbeError> {
        let mut followed = Followed {
            final_url: fetched.url.clone(),
            response: fetched.response.clone(),
            chain: Vec::new(),
            elapsed: fetched.response.response_time,
            error: None,
        };
        if !self.probe.follow_redirects && !self.probe.follow_host_redirects {
            return Ok(followed);
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(fetched.url.to_string());
        let mut request = fetched.request.clone();

        loop {
            let location = followed.response.header("location").map(str::to_string);
            followed.chain.push(ChainHop {
                url: followed.final_url.to_string(),
                status_code: followed.response.status_code,
                location: location.clone(),
            });

            let status = followed.response.status_code;
            let Some(location) = location.filter(|_| (300..400).contains(&status)) else {
                return Ok(followed);
            };
            let next = match resolve_url(&followed.final_url, &location) {
                Ok(next) => next,
                Err(e) => {
                    followed.error = Some(ProbeError::Redirect(format!(
                        "invalid location {}: {}",
                        location, e
                    )));
                    return Ok(followed);
                }
            };

            if self.probe.follow_host_redirects
                && !self.probe.follow_redirects
                && !same_host(&followed.final_url, &next)
            {
                return Ok(followed);
            }
            if !visited.insert(next.to_string()) {
                followed.error = Some(ProbeError::Redirect(format!("redirect cycle at {}", next)));
                return Ok(followed);
            }
            if followed.chain.len() > self.probe.max_redirects as usize {
                followed.error = Some(ProbeError::Redirect(format!(
                    "stopped after {} redirects",
                    self.probe.max_redirects
                )));
                return Ok(followed);
            }

            if matches!(status, 301..=303) && request.method != reqwest::Method::HEAD {
                request.method = reqwest::Method::GET;
                request.body = None;
            }
            if !same_host(&followed.final_url, &next) {
                request.host_header = None;
            }
            request.url = next.clone();

            match self.send_with_retries(&request, cancel).await {
                Ok(response) => {
                    followed.elapsed += response.response_time;
                    followed.final_url = next;
                    followed.response = response;
                }
                Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
                Err(e) => {
                    followed.error = Some(e);
                    return Ok(followed);
                }
            }
        }
    }

    /// 由首个响应完成剩余步骤
    async fn complete(
        &self,
        target: &Target,
        fetched: Fetched,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeError> {
        let followed = self.follow(&fetched, cancel).await?;
        let response = &followed.response;
        let body = response.text();
        let summary = summarize_html(&body);

        let mut result = ProbeResult::for_target(target);
        result.url = fetched.url.to_string();
        result.scheme = fetched.scheme.as_str().to_string();
        result.port = target.port_for(fetched.scheme);
        if followed.final_url != fetched.url {
            result.final_url = Some(followed.final_url.to_string());
        }
        result.status_code = response.status_code;
        result.content_length = response
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(response.body.len() as u64);
        result.content_type = response.header("content-type").map(str::to_string);
        result.webserver = response.header("server").map(str::to_string);
        result.location = response.header("location").map(str::to_string);
        result.response_time_ms = followed.elapsed.as_millis() as u64;
        result.title = summary.title.clone();
        result.lines = count_lines(&body);
        result.words = count_words(&body);
        result.body_preview = body_preview(&body, self.probe.body_preview);
        result.http2 = self.probe.http2_probe && response.http2;
        result.ip = response.remote_ip.map(|ip| ip.to_string());
        result.chain_status_codes = followed.chain.iter().map(|hop| hop.status_code).collect();
        result.chain = followed.chain.clone();
        if self.probe.include_headers {
            result.headers = response.headers.clone();
        }
        if let Some(error) = &followed.error {
            result.failed = true;
            result.error = Some(error.to_string());
        }

        if self.probe.tls_probe && fetched.scheme == Scheme::Https {
            self.probe_tls(&mut result, target, &fetched, response, cancel)
                .await?;
        }

        if self.render.enabled() {
            self.render_page(&mut result, &followed.final_url, cancel)
                .await?;
        }

        if self.probe.tech_detect {
            if let Some(detector) = &self.tech_detector {
                result.technologies = detector.detect(&response.headers, &body);
            }
        }

        let text = result
            .headless_body
            .as_deref()
            .map(|html| summarize_html(html).text)
            .unwrap_or_else(|| {
                if summary.text.is_empty() {
                    body.clone()
                } else {
                    summary.text.clone()
                }
            });
        let simhash_source = simhash_document(response.status_code, &response.headers, &text);
        let has_body = !response.body.is_empty();
        result.hashes = Some(ResponseHashes {
            body_sha256: sha256_hex(&response.body),
            body_mmh3: murmur3_32(&response.body, 0).to_string(),
            header_sha256: header_hash(&response.headers),
            simhash: simhash(&simhash_source),
        });

        if self.probe.favicon {
            self.fetch_favicon(&mut result, &followed.final_url, summary.favicon_href.as_deref(), cancel)
                .await?;
        }

        self.enrich_network(&mut result, target, cancel).await?;
        self.extract(&mut result, &body);

        let suppressed = !self.filter.evaluate(&result, &body);
        if self.probe.include_body {
            result.body = Some(body);
        }

        Ok(ProbeOutcome {
            result,
            suppressed,
            has_body,
        })
    }

    async fn probe_tls(
        &self,
        result: &mut ProbeResult,
        target: &Target,
        fetched: &Fetched,
        response: &HttpResponse,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        let port = target.port_for(Scheme::Https);
        let sni = self.probe.sni.as_deref();

        let Some(prober) = &self.tls_prober else {
            // the handshake of the main request already carries the leaf certificate
            result.tls = Some(tls_data(
                &target.host,
                port,
                sni,
                fetched.response.peer_certificate.clone(),
                BTreeMap::new(),
            ));
            return Ok(());
        };

        self.acquire(cancel).await?;
        let probed = self
            .guarded(cancel, async {
                Ok(prober.probe(&target.host, port, sni, self.probe.timeout()).await)
            })
            .await?;
        match probed {
            Ok(mut tls) => {
                if tls.certificate_chain.is_empty() {
                    tls.certificate_chain = response
                        .peer_certificate
                        .iter()
                        .map(|der| BASE64.encode(der))
                        .collect();
                }
                result.tls = Some(tls);
            }
            Err(e) => debug!(host = %target.host, port, "TLS probe failed: {}", e),
        }
        Ok(())
    }

    async fn render_page(
        &self,
        result: &mut ProbeResult,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        let Some(renderer) = &self.renderer else {
            return Ok(());
        };

        self.acquire(cancel).await?;
        let rendered = self
            .guarded(cancel, async { Ok(renderer.render(url.as_str()).await) })
            .await?;
        match rendered {
            Ok(output) => {
                if self.render.headless_body {
                    result.headless_body = Some(output.html);
                }
                if !self.render.omit_screenshot_bytes {
                    result.screenshot = output.screenshot.map(|png| BASE64.encode(png));
                }
            }
            Err(e) => {
                warn!(url = %url, "Render failed: {}", e);
                result.render_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    async fn fetch_favicon(
        &self,
        result: &mut ProbeResult,
        page_url: &Url,
        href: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        let Ok(favicon_url) = resolve_url(page_url, href.unwrap_or("/favicon.ico")) else {
            return Ok(());
        };
        if !matches!(favicon_url.scheme(), "http" | "https") {
            return Ok(());
        }

        let request = HttpRequest {
            url: favicon_url.clone(),
            method: reqwest::Method::GET,
            headers: self.probe.headers.clone(),
            host_header: None,
            body: None,
            timeout: self.probe.timeout(),
            max_body: self.probe.max_body_read,
        };
        self.acquire(cancel).await?;
        match self.guarded(cancel, self.http.send(&request)).await {
            Ok(response) if response.status_code == 200 && !response.body.is_empty() => {
                result.favicon_mmh3 = Some(favicon_hash(&response.body).to_string());
                result.favicon_url = Some(favicon_url.to_string());
            }
            Ok(_) => {}
            Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
            Err(e) => debug!(url = %favicon_url, "Favicon fetch failed: {}", e),
        }
        Ok(())
    }

    /// DNS记录、CDN与ASN
    async fn enrich_network(
        &self,
        result: &mut ProbeResult,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        if self.probe.resolve_dns {
            if let Some(resolver) = &self.dns_resolver {
                let resolved = self
                    .guarded(cancel, async { Ok(resolver.resolve(&target.host).await) })
                    .await?;
                match resolved {
                    Ok(records) => result.dns = Some(records),
                    Err(e) => debug!(host = %target.host, "DNS lookup failed: {}", e),
                }
            }
        }

        if self.probe.cdn_detect {
            let ip = result.ip.as_deref().and_then(|ip| ip.parse().ok());
            if let (Some(resolver), Some(ip)) = (&self.cdn_resolver, ip) {
                result.cdn_info = resolver.cdn(ip);
                result.cdn = result.cdn_info.is_some();
                result.asn = resolver.asn(ip);
            }
        }
        Ok(())
    }

    fn extract(&self, result: &mut ProbeResult, body: &str) {
        for (pattern, re) in &self.extractors {
            let mut seen = HashSet::new();
            let matches: Vec<String> = re
                .find_iter(body)
                .map(|m| m.as_str().to_string())
                .filter(|m| seen.insert(m.clone()))
                .collect();
            if !matches.is_empty() {
                result.extracts.insert(pattern.clone(), matches);
            }
        }
    }
}

#[cfg(test)]
#[path = "probe_pipeline_test.rs"]
mod tests;
