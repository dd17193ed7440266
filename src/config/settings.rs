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

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::services::filter_service::ResultFilter;
use crate::utils::errors::ConfigurationError;

/// 应用程序配置设置
///
/// 按职责分组：输入、探测、限速、熔断、去重、过滤、渲染、断点续扫、输出和关闭
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// 输入配置
    pub input: InputSettings,
    /// 探测行为配置
    pub probe: ProbeSettings,
    /// 速率限制配置
    pub rate_limit: RateLimitSettings,
    /// 主机错误熔断配置
    pub breaker: BreakerSettings,
    /// 响应去重配置
    pub dedup: DedupSettings,
    /// 匹配/过滤配置
    pub filter: FilterSettings,
    /// 无头浏览器渲染配置
    pub render: RenderSettings,
    /// 断点续扫配置
    pub resume: ResumeSettings,
    /// 输出配置
    pub output: OutputSettings,
    /// 关闭配置
    pub shutdown: ShutdownSettings,
}

/// 输入配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputSettings {
    /// 内联目标列表
    pub targets: Vec<String>,
    /// 目标列表文件（每行一个目标）
    pub file: Option<String>,
    /// 关闭输入去重
    pub skip_dedupe: bool,
    /// 输入去重缓存容量
    pub dedupe_capacity: usize,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            file: None,
            skip_dedupe: false,
            dedupe_capacity: 1_000_000,
        }
    }
}

/// 探测行为配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// 工作线程数
    pub threads: usize,
    /// 单个请求超时时间（秒）
    pub timeout_secs: u64,
    /// 连接失败重试次数
    pub retries: u32,
    /// HTTP方法列表
    pub methods: Vec<String>,
    /// 请求路径列表
    pub paths: Vec<String>,
    /// 额外探测的端口
    pub ports: Vec<u16>,
    /// 请求体
    pub body: Option<String>,
    /// 自定义请求头
    pub headers: BTreeMap<String, String>,
    /// User-Agent
    pub user_agent: String,
    /// 优先使用HTTPS
    pub prefer_https: bool,
    /// 关闭协议回退
    pub no_fallback: bool,
    /// 显式指定协议的目标不做回退
    pub no_fallback_scheme: bool,
    /// 跟随重定向
    pub follow_redirects: bool,
    /// 仅跟随同主机重定向
    pub follow_host_redirects: bool,
    /// 最大重定向次数
    pub max_redirects: u32,
    /// 虚拟主机Host头列表
    pub vhosts: Vec<String>,
    /// TLS探测
    pub tls_probe: bool,
    /// TLS SNI
    pub sni: Option<String>,
    /// HTTP/2探测
    pub http2_probe: bool,
    /// 技术识别
    pub tech_detect: bool,
    /// favicon哈希
    pub favicon: bool,
    /// 输出DNS记录
    pub resolve_dns: bool,
    /// CDN/ASN识别
    pub cdn_detect: bool,
    /// CDN主机仅探测80/443端口
    pub exclude_cdn: bool,
    /// 最大读取响应体字节数
    pub max_body_read: usize,
    /// 响应体预览长度
    pub body_preview: usize,
    /// 提取正则
    pub extract_regex: Vec<String>,
    /// 输出完整响应体
    pub include_body: bool,
    /// 输出响应头
    pub include_headers: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            threads: 50,
            timeout_secs: 10,
            retries: 0,
            methods: vec!["GET".to_string()],
            paths: Vec::new(),
            ports: Vec::new(),
            body: None,
            headers: BTreeMap::new(),
            user_agent: "Mozilla/5.0 (compatible; probex/0.1)".to_string(),
            prefer_https: true,
            no_fallback: false,
            no_fallback_scheme: true,
            follow_redirects: false,
            follow_host_redirects: false,
            max_redirects: 10,
            vhosts: Vec::new(),
            tls_probe: false,
            sni: None,
            http2_probe: false,
            tech_detect: false,
            favicon: false,
            resolve_dns: false,
            cdn_detect: false,
            exclude_cdn: false,
            max_body_read: 4 * 1024 * 1024,
            body_preview: 100,
            extract_regex: Vec::new(),
            include_body: false,
            include_headers: false,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 速率限制配置设置
///
/// `per_second` 与 `per_minute` 互斥，均为0表示不限速
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// 每秒请求数
    pub per_second: u32,
    /// 每分钟请求数
    pub per_minute: u32,
    /// 令牌桶容量（突发上限）
    ///
    /// 为1时任何滚动窗口内的请求数都不超过配置速率。大于1时一个窗口内
    /// 最多放行 `rate + burst - 1` 个请求，因此不得超过每个周期的速率。
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_second: 150,
            per_minute: 0,
            burst: 1,
        }
    }
}

/// 主机错误熔断配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// 单主机最大错误次数，负数表示关闭熔断
    pub max_host_errors: i64,
    /// 状态缓存容量（LRU）
    pub capacity: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_host_errors: 30,
            capacity: 100_000,
        }
    }
}

/// 响应去重配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupSettings {
    /// 关闭完全重复响应的抑制
    pub disabled: bool,
    /// 聚类的最大汉明距离
    pub threshold: u32,
    /// 已见哈希缓存容量（LRU）
    pub capacity: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            threshold: 3,
            capacity: 100_000,
        }
    }
}

/// 匹配/过滤配置设置
///
/// `match_*` 全部满足才输出，`filter_*` 任一命中即抑制
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterSettings {
    pub match_status_codes: Vec<u16>,
    pub filter_status_codes: Vec<u16>,
    pub match_content_length: Vec<u64>,
    pub filter_content_length: Vec<u64>,
    pub match_lines: Vec<usize>,
    pub filter_lines: Vec<usize>,
    pub match_words: Vec<usize>,
    pub filter_words: Vec<usize>,
    pub match_strings: Vec<String>,
    pub filter_strings: Vec<String>,
    pub match_regex: Vec<String>,
    pub filter_regex: Vec<String>,
    pub match_favicon: Vec<String>,
    pub filter_favicon: Vec<String>,
    /// 响应时间条件，如 `< 1.5`（秒）
    pub match_response_time: Option<String>,
    pub filter_response_time: Option<String>,
    pub match_cdn: Vec<String>,
    pub filter_cdn: Vec<String>,
}

/// 无头浏览器渲染配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSettings {
    /// 截图
    pub screenshot: bool,
    /// 输出渲染后的页面内容
    pub headless_body: bool,
    /// 渲染超时时间（秒）
    pub timeout_secs: u64,
    /// 页面加载后的空闲等待时间（秒）
    pub idle_secs: u64,
    /// 远程Chrome调试地址
    pub remote_debugging_url: Option<String>,
    /// 额外的Chrome启动参数
    pub chrome_args: Vec<String>,
    /// 结果中不包含截图字节
    pub omit_screenshot_bytes: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            screenshot: false,
            headless_body: false,
            timeout_secs: 10,
            idle_secs: 1,
            remote_debugging_url: None,
            chrome_args: Vec::new(),
            omit_screenshot_bytes: false,
        }
    }
}

impl RenderSettings {
    pub fn enabled(&self) -> bool {
        self.screenshot || self.headless_body
    }
}

/// 断点续扫配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResumeSettings {
    /// 启用断点续扫
    pub enabled: bool,
    /// 断点文件路径
    pub path: String,
    /// 断点文件必须可用，否则终止运行
    pub required: bool,
    /// 周期性写盘间隔（秒）
    pub flush_interval_secs: u64,
}

impl Default for ResumeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "resume.cfg.json".to_string(),
            required: false,
            flush_interval_secs: 10,
        }
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
    Csv,
}

/// 输出配置设置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    /// 输出格式
    pub format: OutputFormat,
    /// 输出文件，未设置时写stdout
    pub path: Option<String>,
    /// 不输出失败结果
    pub omit_failed: bool,
    /// JSON格式日志
    pub json_logs: bool,
}

/// 关闭配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// 等待工作者退出的宽限期（秒）
    pub grace_period_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: 15,
        }
    }
}

/// 参与断点指纹计算的配置子集
#[derive(Serialize)]
struct FingerprintView<'a> {
    probe: ProbeSettings,
    dedup: &'a DedupSettings,
    filter: &'a FilterSettings,
    render: (bool, bool),
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次加载 `config/default`、`config/{PROBEX_ENV}`、可选的显式配置文件，
    /// 最后由 `PROBEX__SECTION__KEY` 环境变量覆盖
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载且校验通过的配置
    /// * `Err(ConfigurationError)` - 配置加载或校验失败
    pub fn new(config_file: Option<&str>) -> Result<Self, ConfigurationError> {
        let env = std::env::var("PROBEX_ENV").unwrap_or_else(|_| "default".to_string());
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("PROBEX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("input.targets")
                    .with_list_parse_key("probe.methods")
                    .with_list_parse_key("probe.paths")
                    .with_list_parse_key("probe.ports")
                    .with_list_parse_key("probe.vhosts")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// 校验配置
    ///
    /// 在构造时执行，探测流程中不再做零散的检查
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let probe = &self.probe;
        if probe.threads == 0 {
            return Err(ConfigurationError::invalid("probe.threads", "must be at least 1"));
        }
        if probe.timeout_secs == 0 {
            return Err(ConfigurationError::invalid(
                "probe.timeout_secs",
                "must be at least 1",
            ));
        }
        if probe.methods.is_empty() {
            return Err(ConfigurationError::invalid(
                "probe.methods",
                "at least one method is required",
            ));
        }
        for method in &probe.methods {
            reqwest::Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(
                |_| ConfigurationError::invalid("probe.methods", format!("invalid method {}", method)),
            )?;
        }
        if probe.ports.contains(&0) {
            return Err(ConfigurationError::invalid("probe.ports", "port 0 is not probeable"));
        }
        for vhost in &probe.vhosts {
            reqwest::header::HeaderValue::from_str(vhost).map_err(|_| {
                ConfigurationError::invalid(
                    "probe.vhosts",
                    format!("{:?} is not a valid Host header value", vhost),
                )
            })?;
        }
        for (name, value) in &probe.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigurationError::invalid("probe.headers", format!("invalid header name {:?}", name))
            })?;
            reqwest::header::HeaderValue::from_str(value).map_err(|_| {
                ConfigurationError::invalid(
                    "probe.headers",
                    format!("invalid value for header {}", name),
                )
            })?;
        }
        for pattern in &probe.extract_regex {
            regex::Regex::new(pattern).map_err(|source| ConfigurationError::Regex {
                pattern: pattern.clone(),
                source,
            })?;
        }

        let rate = &self.rate_limit;
        if rate.per_second > 0 && rate.per_minute > 0 {
            return Err(ConfigurationError::invalid(
                "rate_limit",
                "per_second and per_minute are mutually exclusive",
            ));
        }
        if rate.burst == 0 {
            return Err(ConfigurationError::invalid("rate_limit.burst", "must be at least 1"));
        }
        let period_rate = rate.per_second.max(rate.per_minute);
        if period_rate > 0 && rate.burst > period_rate {
            return Err(ConfigurationError::invalid(
                "rate_limit.burst",
                format!("must not exceed the configured rate of {}", period_rate),
            ));
        }

        if self.breaker.capacity == 0 {
            return Err(ConfigurationError::invalid("breaker.capacity", "must be at least 1"));
        }
        if self.dedup.capacity == 0 {
            return Err(ConfigurationError::invalid("dedup.capacity", "must be at least 1"));
        }
        if self.dedup.threshold > 64 {
            return Err(ConfigurationError::invalid(
                "dedup.threshold",
                "hamming distance over 64-bit hashes cannot exceed 64",
            ));
        }
        if self.input.dedupe_capacity == 0 {
            return Err(ConfigurationError::invalid(
                "input.dedupe_capacity",
                "must be at least 1",
            ));
        }

        if self.render.enabled() && self.render.timeout_secs == 0 {
            return Err(ConfigurationError::invalid(
                "render.timeout_secs",
                "must be at least 1 when rendering is enabled",
            ));
        }

        if self.resume.enabled && self.resume.path.trim().is_empty() {
            return Err(ConfigurationError::invalid(
                "resume.path",
                "a checkpoint path is required when resume is enabled",
            ));
        }
        if self.resume.flush_interval_secs == 0 {
            return Err(ConfigurationError::invalid(
                "resume.flush_interval_secs",
                "must be at least 1",
            ));
        }

        // Compiles every predicate once; the compiled form is rebuilt by the runner.
        ResultFilter::from_settings(&self.filter)?;

        Ok(())
    }

    /// 计算影响扫描结果集合的配置指纹
    ///
    /// 输入、断点、输出和关闭配置不参与计算
    pub fn fingerprint(&self) -> String {
        // Worker count changes scheduling, not the result set.
        let mut probe = self.probe.clone();
        probe.threads = 0;
        let view = FingerprintView {
            probe,
            dedup: &self.dedup,
            filter: &self.filter,
            render: (self.render.screenshot, self.render.headless_body),
        };
        // Serializing plain structs with BTreeMap fields cannot fail.
        let canonical = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
