// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use regex::Regex;
use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::models::probe_result::Technology;
use crate::engines::traits::TechDetector;

/// 规则匹配位置
#[derive(Debug, Clone, Copy)]
enum Source {
    /// 指定响应头的值
    Header(&'static str),
    /// Set-Cookie中的cookie名称
    Cookie,
    /// 响应体
    Body,
}

/// 识别规则：正则的第一个捕获组（如果有）作为版本号
struct Rule {
    name: &'static str,
    categories: &'static [&'static str],
    source: Source,
    pattern: Regex,
}

const RULES: &[(&str, &[&str], Source, &str)] = &[
    ("Nginx", &["Web servers"], Source::Header("server"), r"(?i)nginx(?:/([\d.]+))?"),
    ("Apache HTTP Server", &["Web servers"], Source::Header("server"), r"(?i)apache(?:/([\d.]+))?"),
    ("Microsoft IIS", &["Web servers"], Source::Header("server"), r"(?i)microsoft-iis(?:/([\d.]+))?"),
    ("LiteSpeed", &["Web servers"], Source::Header("server"), r"(?i)litespeed"),
    ("Caddy", &["Web servers"], Source::Header("server"), r"(?i)^caddy"),
    ("Envoy", &["Reverse proxies"], Source::Header("server"), r"(?i)envoy"),
    ("Cloudflare", &["CDN"], Source::Header("server"), r"(?i)^cloudflare"),
    ("Amazon CloudFront", &["CDN"], Source::Header("via"), r"(?i)cloudfront"),
    ("Varnish", &["Caching"], Source::Header("via"), r"(?i)varnish"),
    ("PHP", &["Programming languages"], Source::Header("x-powered-by"), r"(?i)php(?:/([\d.]+))?"),
    ("Express", &["Web frameworks"], Source::Header("x-powered-by"), r"(?i)^express$"),
    ("ASP.NET", &["Web frameworks"], Source::Header("x-aspnet-version"), r"([\d.]+)"),
    ("Next.js", &["JavaScript frameworks"], Source::Header("x-powered-by"), r"(?i)next\.js(?: ([\d.]+))?"),
    ("PHP", &["Programming languages"], Source::Cookie, r"^PHPSESSID$"),
    ("Java", &["Programming languages"], Source::Cookie, r"^JSESSIONID$"),
    ("Laravel", &["Web frameworks"], Source::Cookie, r"^laravel_session$"),
    ("Django", &["Web frameworks"], Source::Cookie, r"^csrftoken$"),
    ("WordPress", &["CMS", "Blogs"], Source::Body, r#"(?i)<meta name="generator" content="WordPress ?([\d.]+)?"#),
    ("WordPress", &["CMS", "Blogs"], Source::Body, r"/wp-(?:content|includes)/"),
    ("Drupal", &["CMS"], Source::Body, r#"(?i)<meta name="generator" content="Drupal ?(\d+)?"#),
    ("Joomla", &["CMS"], Source::Body, r#"(?i)<meta name="generator" content="Joomla!? ?([\d.]+)?"#),
    ("jQuery", &["JavaScript libraries"], Source::Body, r"jquery[.-]([\d.]+)(?:\.min)?\.js"),
    ("React", &["JavaScript frameworks"], Source::Body, r"data-reactroot|react(?:\.production)?\.min\.js"),
    ("Vue.js", &["JavaScript frameworks"], Source::Body, r"vue(?:\.runtime)?(?:\.min)?\.js|data-v-[0-9a-f]{8}"),
    ("Angular", &["JavaScript frameworks"], Source::Body, r#"ng-version="([\d.]+)""#),
    ("Bootstrap", &["UI frameworks"], Source::Body, r"bootstrap(?:\.min)?\.(?:css|js)"),
    ("Google Analytics", &["Analytics"], Source::Body, r"google-analytics\.com/(?:ga|analytics)\.js|googletagmanager\.com/gtag"),
];

/// 基于规则的技术识别
///
/// 对响应头、cookie名称和响应体做正则匹配，同名技术合并为一条
pub struct RuleTechDetector {
    rules: Vec<Rule>,
}

impl Default for RuleTechDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTechDetector {
    pub fn new() -> Self {
        let rules = RULES
            .iter()
            .filter_map(|(name, categories, source, pattern)| match Regex::new(pattern) {
                Ok(pattern) => Some(Rule {
                    name: *name,
                    categories: *categories,
                    source: *source,
                    pattern,
                }),
                Err(e) => {
                    warn!(technology = *name, "Skipping invalid detection rule: {}", e);
                    None
                }
            })
            .collect();
        Self { rules }
    }
}

impl TechDetector for RuleTechDetector {
    fn detect(&self, headers: &BTreeMap<String, String>, body: &str) -> Vec<Technology> {
        let cookies: Vec<&str> = headers
            .get("set-cookie")
            .map(|raw| {
                raw.split(", ")
                    .filter_map(|cookie| cookie.split('=').next())
                    .map(str::trim)
                    .collect()
            })
            .unwrap_or_default();

        let mut found: BTreeMap<&'static str, Technology> = BTreeMap::new();
        for rule in &self.rules {
            let version = match rule.source {
                Source::Header(name) => headers
                    .get(name)
                    .and_then(|value| rule.pattern.captures(value))
                    .map(|caps| caps.get(1).map(|m| m.as_str().to_string())),
                Source::Cookie => cookies
                    .iter()
                    .any(|cookie| rule.pattern.is_match(cookie))
                    .then_some(None),
                Source::Body => rule
                    .pattern
                    .captures(body)
                    .map(|caps| caps.get(1).map(|m| m.as_str().to_string())),
            };

            let Some(version) = version else { continue };
            let entry = found.entry(rule.name).or_insert_with(|| Technology {
                name: rule.name.to_string(),
                version: None,
                categories: rule.categories.iter().map(|c| c.to_string()).collect(),
            });
            if entry.version.is_none() {
                entry.version = version.filter(|v| !v.is_empty());
            }
        }

        found.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(RuleTechDetector::new().rules.len(), RULES.len());
    }

    #[test]
    fn test_detects_server_with_version() {
        let detector = RuleTechDetector::new();
        let found = detector.detect(&headers(&[("server", "nginx/1.25.3")]), "");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Nginx");
        assert_eq!(found[0].version.as_deref(), Some("1.25.3"));
        assert_eq!(found[0].categories, vec!["Web servers".to_string()]);
    }

    #[test]
    fn test_merges_matches_for_same_technology() {
        let detector = RuleTechDetector::new();
        let body = r#"<meta name="generator" content="WordPress 6.4.2" /><link href="/wp-content/x.css">"#;
        let found = detector.detect(
            &headers(&[("x-powered-by", "PHP/8.2.1"), ("set-cookie", "PHPSESSID=abc; path=/")]),
            body,
        );

        let names: Vec<_> = found.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["PHP", "WordPress"]);
        assert_eq!(found[0].version.as_deref(), Some("8.2.1"));
        assert_eq!(found[1].version.as_deref(), Some("6.4.2"));
    }

    #[test]
    fn test_nothing_detected_on_plain_response() {
        let detector = RuleTechDetector::new();
        assert!(detector.detect(&BTreeMap::new(), "hello").is_empty());
    }
}
