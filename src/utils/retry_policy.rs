// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::ProbeError;

/// 重试策略配置
///
/// 探测请求的重试不做退避：总吞吐量已经由全局限速器控制。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次请求）
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 0 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// 总尝试次数
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 是否应该重试
    ///
    /// `attempt` 为已完成的尝试次数（从1开始）
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// 根据错误类型判断是否应该重试
    pub fn should_retry_with_error(&self, attempt: u32, error: &ProbeError) -> bool {
        self.should_retry(attempt) && error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(2);

        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_should_retry_with_error() {
        let policy = RetryPolicy::new(3);

        assert!(policy.should_retry_with_error(1, &ProbeError::Connection("refused".into())));
        assert!(policy.should_retry_with_error(1, &ProbeError::Timeout));
        assert!(!policy.should_retry_with_error(1, &ProbeError::Protocol("bad tls".into())));
        assert!(!policy.should_retry_with_error(1, &ProbeError::Cancelled));
        assert!(!policy.should_retry_with_error(4, &ProbeError::Timeout));
    }
}
