// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::counter;
use tracing::warn;

use crate::config::settings::BreakerSettings;
use crate::infrastructure::cache::bounded_cache::BoundedCache;

/// 主机错误状态
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostErrorState {
    /// 失败次数，只增不减
    pub failure_count: u64,
    /// 是否已熔断，一旦熔断在本次运行内保持
    pub tripped: bool,
}

/// 主机错误熔断器
///
/// 按主机统计失败的目标数，达到阈值后该主机上剩余的目标直接跳过。
/// 阈值为负数时关闭熔断；阈值为0时所有主机都视为已熔断。
/// 状态保存在有界LRU缓存中，容量耗尽时最久未访问的主机状态会被淘汰。
pub struct HostErrorBreaker {
    states: BoundedCache<String, HostErrorState>,
    threshold: Option<u64>,
}

impl HostErrorBreaker {
    /// 创建新的熔断器实例
    ///
    /// # 参数
    ///
    /// * `max_host_errors` - 失败阈值，负数关闭熔断
    /// * `capacity` - 状态缓存容量
    pub fn new(max_host_errors: i64, capacity: usize) -> Self {
        Self {
            states: BoundedCache::new(capacity),
            threshold: u64::try_from(max_host_errors).ok(),
        }
    }

    pub fn from_settings(settings: &BreakerSettings) -> Self {
        Self::new(settings.max_host_errors, settings.capacity)
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold.is_some()
    }

    /// 记录一次失败
    ///
    /// # 返回值
    ///
    /// 记录后该主机是否处于熔断状态
    pub fn record_failure(&self, host: &str) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };

        let mut newly_tripped = false;
        let state = self.states.update(
            host.to_string(),
            HostErrorState::default,
            |state| {
                state.failure_count += 1;
                if !state.tripped && state.failure_count >= threshold {
                    state.tripped = true;
                    newly_tripped = true;
                }
            },
        );

        counter!("host_breaker_failures_total").increment(1);
        if newly_tripped {
            counter!("host_breaker_tripped_total").increment(1);
            warn!(
                host,
                failures = state.failure_count,
                threshold,
                "Host error threshold reached, skipping remaining targets"
            );
        }
        state.tripped
    }

    /// 主机是否已熔断
    pub fn is_tripped(&self, host: &str) -> bool {
        match self.threshold {
            None => false,
            Some(0) => true,
            Some(_) => self
                .states
                .get(&host.to_string())
                .is_some_and(|state| state.tripped),
        }
    }

    /// 主机的失败次数
    pub fn failure_count(&self, host: &str) -> u64 {
        self.states
            .peek(&host.to_string())
            .map(|state| state.failure_count)
            .unwrap_or(0)
    }

    /// 清空所有状态
    pub fn purge(&self) {
        self.states.purge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_trips_at_threshold() {
        let breaker = HostErrorBreaker::new(3, 100);

        assert!(!breaker.record_failure("a.com"));
        assert!(!breaker.record_failure("a.com"));
        assert!(!breaker.is_tripped("a.com"));
        assert!(breaker.record_failure("a.com"));
        assert!(breaker.is_tripped("a.com"));
        assert_eq!(breaker.failure_count("a.com"), 3);

        // other hosts are unaffected
        assert!(!breaker.is_tripped("b.com"));

        // stays tripped
        assert!(breaker.record_failure("a.com"));
        assert_eq!(breaker.failure_count("a.com"), 4);
    }

    #[test]
    fn test_negative_threshold_disables() {
        let breaker = HostErrorBreaker::new(-1, 100);
        assert!(!breaker.is_enabled());
        for _ in 0..100 {
            assert!(!breaker.record_failure("a.com"));
        }
        assert!(!breaker.is_tripped("a.com"));
        assert_eq!(breaker.failure_count("a.com"), 0);
    }

    #[test]
    fn test_zero_threshold_trips_every_host() {
        let breaker = HostErrorBreaker::new(0, 100);
        assert!(breaker.is_tripped("never-seen.com"));
        assert!(breaker.record_failure("a.com"));
    }

    #[test]
    fn test_purge_resets_state() {
        let breaker = HostErrorBreaker::new(1, 100);
        breaker.record_failure("a.com");
        assert!(breaker.is_tripped("a.com"));

        breaker.purge();
        assert!(!breaker.is_tripped("a.com"));
        assert_eq!(breaker.failure_count("a.com"), 0);
    }

    #[test]
    fn test_concurrent_failures_trip_exactly_once() {
        let breaker = Arc::new(HostErrorBreaker::new(50, 100));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    (0..10).filter(|_| breaker.record_failure("a.com")).count()
                })
            })
            .collect();
        let tripped_reports: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(breaker.failure_count("a.com"), 100);
        // the 50th through 100th failures all observe the tripped state
        assert_eq!(tripped_reports, 51);
    }
}
