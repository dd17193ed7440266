// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use regex::Regex;

use crate::config::settings::FilterSettings;
use crate::domain::models::probe_result::ProbeResult;
use crate::utils::errors::ConfigurationError;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq)]
enum Comparison {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
}

/// 单个条件
#[derive(Debug, Clone)]
enum Condition {
    StatusCode(Vec<u16>),
    ContentLength(Vec<u64>),
    Lines(Vec<usize>),
    Words(Vec<usize>),
    /// 响应体包含任一字符串（忽略大小写）
    Strings(Vec<String>),
    Regex(Vec<Regex>),
    Favicon(Vec<String>),
    /// 响应时间（秒）
    ResponseTime(Comparison, f64),
    Cdn(Vec<String>),
}

impl Condition {
    fn holds(&self, result: &ProbeResult, body: &str) -> bool {
        match self {
            Condition::StatusCode(codes) => codes.contains(&result.status_code),
            Condition::ContentLength(lengths) => lengths.contains(&result.content_length),
            Condition::Lines(lines) => lines.contains(&result.lines),
            Condition::Words(words) => words.contains(&result.words),
            Condition::Strings(needles) => {
                let haystack = body.to_lowercase();
                needles.iter().any(|needle| haystack.contains(needle.as_str()))
            }
            Condition::Regex(patterns) => patterns.iter().any(|re| re.is_match(body)),
            Condition::Favicon(hashes) => result
                .favicon_mmh3
                .as_ref()
                .is_some_and(|hash| hashes.contains(hash)),
            Condition::ResponseTime(op, seconds) => {
                let elapsed = result.response_time_ms as f64 / 1000.0;
                match op {
                    Comparison::Less => elapsed < *seconds,
                    Comparison::LessOrEqual => elapsed <= *seconds,
                    Comparison::Greater => elapsed > *seconds,
                    Comparison::GreaterOrEqual => elapsed >= *seconds,
                    Comparison::Equal => (elapsed - *seconds).abs() < f64::EPSILON,
                }
            }
            Condition::Cdn(names) => result
                .cdn_info
                .as_ref()
                .is_some_and(|cdn| names.iter().any(|n| n.eq_ignore_ascii_case(&cdn.name))),
        }
    }
}

/// 条件作用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    /// 必须满足
    Match,
    /// 满足即抑制
    Filter,
}

/// 结果过滤器
///
/// 配置在构造时编译一次。所有match条件都满足、且没有任何filter条件命中时结果才输出。
/// 条件之间只有与/或关系，求值结果与条件顺序无关。
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    predicates: Vec<(Effect, Condition)>,
}

impl ResultFilter {
    /// 由配置编译过滤器
    ///
    /// # 返回值
    ///
    /// * `Ok(ResultFilter)` - 编译后的过滤器
    /// * `Err(ConfigurationError)` - 正则或响应时间条件无效
    pub fn from_settings(settings: &FilterSettings) -> Result<Self, ConfigurationError> {
        let mut filter = Self::default();

        filter.push_list(Effect::Match, &settings.match_status_codes, Condition::StatusCode);
        filter.push_list(Effect::Filter, &settings.filter_status_codes, Condition::StatusCode);
        filter.push_list(Effect::Match, &settings.match_content_length, Condition::ContentLength);
        filter.push_list(Effect::Filter, &settings.filter_content_length, Condition::ContentLength);
        filter.push_list(Effect::Match, &settings.match_lines, Condition::Lines);
        filter.push_list(Effect::Filter, &settings.filter_lines, Condition::Lines);
        filter.push_list(Effect::Match, &settings.match_words, Condition::Words);
        filter.push_list(Effect::Filter, &settings.filter_words, Condition::Words);
        filter.push_list(Effect::Match, &lowercase(&settings.match_strings), Condition::Strings);
        filter.push_list(Effect::Filter, &lowercase(&settings.filter_strings), Condition::Strings);
        filter.push_list(Effect::Match, &settings.match_favicon, Condition::Favicon);
        filter.push_list(Effect::Filter, &settings.filter_favicon, Condition::Favicon);
        filter.push_list(Effect::Match, &settings.match_cdn, Condition::Cdn);
        filter.push_list(Effect::Filter, &settings.filter_cdn, Condition::Cdn);

        filter.push_list(Effect::Match, &compile(&settings.match_regex)?, Condition::Regex);
        filter.push_list(Effect::Filter, &compile(&settings.filter_regex)?, Condition::Regex);

        if let Some(expr) = &settings.match_response_time {
            let (op, seconds) = parse_response_time("filter.match_response_time", expr)?;
            filter
                .predicates
                .push((Effect::Match, Condition::ResponseTime(op, seconds)));
        }
        if let Some(expr) = &settings.filter_response_time {
            let (op, seconds) = parse_response_time("filter.filter_response_time", expr)?;
            filter
                .predicates
                .push((Effect::Filter, Condition::ResponseTime(op, seconds)));
        }

        Ok(filter)
    }

    fn push_list<T: Clone>(&mut self, effect: Effect, values: &[T], f: fn(Vec<T>) -> Condition) {
        if !values.is_empty() {
            self.predicates.push((effect, f(values.to_vec())));
        }
    }

    /// 是否没有配置任何条件
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// 判断结果是否应该输出
    ///
    /// 失败和跳过的结果不参与过滤，始终输出
    pub fn evaluate(&self, result: &ProbeResult, body: &str) -> bool {
        if !result.is_success() {
            return true;
        }
        self.predicates.iter().all(|(effect, condition)| {
            let holds = condition.holds(result, body);
            match effect {
                Effect::Match => holds,
                Effect::Filter => !holds,
            }
        })
    }
}

fn lowercase(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ConfigurationError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigurationError::Regex {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// 解析 `< 1.5`、`>=2` 形式的响应时间条件，未写运算符时按 `<` 处理
fn parse_response_time(
    field: &'static str,
    expr: &str,
) -> Result<(Comparison, f64), ConfigurationError> {
    let expr = expr.trim();
    let (op, rest) = if let Some(rest) = expr.strip_prefix("<=") {
        (Comparison::LessOrEqual, rest)
    } else if let Some(rest) = expr.strip_prefix(">=") {
        (Comparison::GreaterOrEqual, rest)
    } else if let Some(rest) = expr.strip_prefix("==") {
        (Comparison::Equal, rest)
    } else if let Some(rest) = expr.strip_prefix('<') {
        (Comparison::Less, rest)
    } else if let Some(rest) = expr.strip_prefix('>') {
        (Comparison::Greater, rest)
    } else if let Some(rest) = expr.strip_prefix('=') {
        (Comparison::Equal, rest)
    } else {
        (Comparison::Less, expr)
    };

    let seconds: f64 = rest
        .trim()
        .trim_end_matches('s')
        .parse()
        .map_err(|_| ConfigurationError::invalid(field, format!("invalid condition `{}`", expr)))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigurationError::invalid(
            field,
            format!("invalid duration in `{}`", expr),
        ));
    }
    Ok((op, seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::probe_result::CdnInfo;
    use crate::domain::models::target::Target;

    fn result(status: u16, length: u64, time_ms: u64) -> ProbeResult {
        let target = Target::parse("example.com").unwrap();
        let mut result = ProbeResult::for_target(&target);
        result.status_code = status;
        result.content_length = length;
        result.response_time_ms = time_ms;
        result.words = 3;
        result.lines = 1;
        result
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let filter = ResultFilter::from_settings(&FilterSettings::default()).unwrap();
        assert!(filter.is_empty());
        assert!(filter.evaluate(&result(404, 0, 10), ""));
    }

    #[test]
    fn test_match_and_filter_status() {
        let filter = ResultFilter::from_settings(&FilterSettings {
            match_status_codes: vec![200, 301],
            filter_content_length: vec![0],
            ..FilterSettings::default()
        })
        .unwrap();

        assert!(filter.evaluate(&result(200, 10, 10), ""));
        assert!(!filter.evaluate(&result(404, 10, 10), ""));
        assert!(!filter.evaluate(&result(200, 0, 10), ""));
    }

    #[test]
    fn test_strings_and_regex() {
        let filter = ResultFilter::from_settings(&FilterSettings {
            match_strings: vec!["Login".to_string()],
            filter_regex: vec![r"(?i)not\s+found".to_string()],
            ..FilterSettings::default()
        })
        .unwrap();

        assert!(filter.evaluate(&result(200, 10, 10), "<h1>LOGIN here</h1>"));
        assert!(!filter.evaluate(&result(200, 10, 10), "welcome"));
        assert!(!filter.evaluate(&result(200, 10, 10), "login page Not  Found"));
    }

    #[test]
    fn test_response_time_and_cdn() {
        let filter = ResultFilter::from_settings(&FilterSettings {
            match_response_time: Some("< 1.5".to_string()),
            filter_cdn: vec!["Cloudflare".to_string()],
            ..FilterSettings::default()
        })
        .unwrap();

        assert!(filter.evaluate(&result(200, 1, 1499), ""));
        assert!(!filter.evaluate(&result(200, 1, 1500), ""));

        let mut behind_cdn = result(200, 1, 10);
        behind_cdn.cdn_info = Some(CdnInfo {
            name: "cloudflare".to_string(),
            kind: "cdn".to_string(),
        });
        assert!(!filter.evaluate(&behind_cdn, ""));
    }

    #[test]
    fn test_error_rows_bypass_filters() {
        let filter = ResultFilter::from_settings(&FilterSettings {
            match_status_codes: vec![200],
            ..FilterSettings::default()
        })
        .unwrap();

        let target = Target::parse("example.com").unwrap();
        assert!(filter.evaluate(&ProbeResult::failure(&target, None, "refused"), ""));
        assert!(filter.evaluate(&ProbeResult::skipped(&target), ""));
    }

    #[test]
    fn test_invalid_conditions_are_rejected() {
        let bad_regex = FilterSettings {
            filter_regex: vec!["[".to_string()],
            ..FilterSettings::default()
        };
        assert!(matches!(
            ResultFilter::from_settings(&bad_regex),
            Err(ConfigurationError::Regex { .. })
        ));

        let bad_time = FilterSettings {
            match_response_time: Some("<= soon".to_string()),
            ..FilterSettings::default()
        };
        assert!(matches!(
            ResultFilter::from_settings(&bad_time),
            Err(ConfigurationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_parse_response_time_operators() {
        let parse = |e: &str| parse_response_time("t", e).unwrap();
        assert_eq!(parse("<1"), (Comparison::Less, 1.0));
        assert_eq!(parse("<= 2"), (Comparison::LessOrEqual, 2.0));
        assert_eq!(parse(">0.5s"), (Comparison::Greater, 0.5));
        assert_eq!(parse(">=3"), (Comparison::GreaterOrEqual, 3.0));
        assert_eq!(parse("== 4"), (Comparison::Equal, 4.0));
        assert_eq!(parse("5"), (Comparison::Less, 5.0));
    }

    #[test]
    fn test_evaluation_is_order_independent() {
        let filter = ResultFilter::from_settings(&FilterSettings {
            match_status_codes: vec![200, 403],
            filter_status_codes: vec![403],
            match_words: vec![3],
            filter_strings: vec!["maintenance".to_string()],
            match_response_time: Some("< 2".to_string()),
            ..FilterSettings::default()
        })
        .unwrap();

        let mut reversed = filter.clone();
        reversed.predicates.reverse();
        let mut rotated = filter.clone();
        rotated.predicates.rotate_left(2);

        let samples = [
            (result(200, 1, 100), "ok"),
            (result(403, 1, 100), "ok"),
            (result(200, 1, 3000), "ok"),
            (result(200, 1, 100), "down for maintenance"),
            (result(500, 1, 100), "ok"),
        ];
        for (sample, body) in &samples {
            let expected = filter.evaluate(sample, body);
            assert_eq!(reversed.evaluate(sample, body), expected);
            assert_eq!(rotated.evaluate(sample, body), expected);
        }
        assert!(filter.evaluate(&samples[0].0, samples[0].1));
        assert!(!filter.evaluate(&samples[1].0, samples[1].1));
    }
}
