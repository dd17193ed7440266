// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use metrics::counter;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::settings::RateLimitSettings;

type DirectLimiter<C> =
    governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// 限速器已停止
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limiter stopped")]
pub struct Cancelled;

/// 全局速率限制器
///
/// 基于GCRA令牌桶，所有访问网络的探测步骤共享一个实例。
/// 突发容量默认为1，任何滚动一秒窗口内发出的请求数都不超过配置速率；
/// 突发容量为 `b` 时窗口内最多放行 `rate + b - 1` 个请求。
pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: Option<DirectLimiter<C>>,
    clock: C,
    stopped: CancellationToken,
}

impl RateLimiter<DefaultClock> {
    /// 根据配置创建限速器
    ///
    /// `per_second` 与 `per_minute` 均为0时不限速
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::with_clock(settings, DefaultClock::default())
    }

    /// 不限速的实例
    pub fn unlimited() -> Self {
        Self::from_settings(&RateLimitSettings {
            per_second: 0,
            per_minute: 0,
            burst: 1,
        })
    }
}

impl<C: Clock + Clone> RateLimiter<C> {
    /// 使用指定时钟创建限速器
    pub fn with_clock(settings: &RateLimitSettings, clock: C) -> Self {
        let limiter = quota_for(settings).map(|quota| {
            debug!(?quota, "Configured global rate limit");
            governor::RateLimiter::direct_with_clock(quota, clock.clone())
        });
        Self {
            limiter,
            clock,
            stopped: CancellationToken::new(),
        }
    }

    /// 是否不限速
    pub fn is_unlimited(&self) -> bool {
        self.limiter.is_none()
    }

    /// 非阻塞地获取一个令牌
    pub fn try_acquire(&self) -> bool {
        if self.stopped.is_cancelled() {
            return false;
        }
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// 等待直到获得一个令牌或限速器被停止
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 获得令牌
    /// * `Err(Cancelled)` - 限速器已停止
    pub async fn acquire(&self) -> Result<(), Cancelled> {
        let Some(limiter) = &self.limiter else {
            return if self.stopped.is_cancelled() {
                Err(Cancelled)
            } else {
                Ok(())
            };
        };

        loop {
            if self.stopped.is_cancelled() {
                return Err(Cancelled);
            }
            let wait = match limiter.check() {
                Ok(()) => {
                    counter!("rate_limiter_permits_total").increment(1);
                    return Ok(());
                }
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };
            counter!("rate_limiter_waits_total").increment(1);
            tokio::select! {
                _ = self.stopped.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
            }
        }
    }

    /// 停止限速器，释放所有等待中的调用方
    pub fn stop(&self) {
        self.stopped.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

fn quota_for(settings: &RateLimitSettings) -> Option<Quota> {
    let burst = NonZeroU32::new(settings.burst).unwrap_or(NonZeroU32::MIN);
    let quota = if let Some(rate) = NonZeroU32::new(settings.per_second) {
        Quota::per_second(rate)
    } else if let Some(rate) = NonZeroU32::new(settings.per_minute) {
        Quota::per_minute(rate)
    } else {
        return None;
    };
    Some(quota.allow_burst(burst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::sync::Arc;

    fn settings(per_second: u32, per_minute: u32) -> RateLimitSettings {
        RateLimitSettings {
            per_second,
            per_minute,
            burst: 1,
        }
    }

    #[test]
    fn test_rolling_window_never_exceeds_rate() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(&settings(5, 0), clock.clone());

        let step = Duration::from_millis(10);
        let mut granted = Vec::new();
        let mut elapsed = Duration::ZERO;
        while elapsed < Duration::from_secs(3) {
            // callers hammer the limiter several times per tick
            for _ in 0..4 {
                if limiter.try_acquire() {
                    granted.push(elapsed);
                }
            }
            clock.advance(step);
            elapsed += step;
        }

        assert!(granted.len() >= 14, "granted only {}", granted.len());
        for start in &granted {
            let in_window = granted
                .iter()
                .filter(|t| **t >= *start && **t < *start + Duration::from_secs(1))
                .count();
            assert!(in_window <= 5, "{} permits in window at {:?}", in_window, start);
        }
    }

    #[test]
    fn test_per_minute_quota() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(&settings(0, 60), clock.clone());

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(999));
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(1));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_burst_allows_initial_batch() {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::with_clock(
            &RateLimitSettings {
                per_second: 2,
                per_minute: 0,
                burst: 3,
            },
            clock,
        );

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_unlimited_acquire_returns_immediately() {
        let limiter = RateLimiter::unlimited();
        assert!(limiter.is_unlimited());
        for _ in 0..1000 {
            limiter.acquire().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stop_releases_blocked_callers() {
        let limiter = Arc::new(RateLimiter::from_settings(&RateLimitSettings {
            per_second: 0,
            per_minute: 1,
            burst: 1,
        }));
        limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        limiter.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
        assert_eq!(outcome, Err(Cancelled));
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_paces_requests() {
        let limiter = RateLimiter::from_settings(&settings(20, 0));
        let start = std::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }
        // first permit is immediate, the next four are 50ms apart
        assert!(start.elapsed() >= Duration::from_millis(180));
    }
}
