//! 指数退避重试策略
//!
//! 基于 backoff crate，为 SSH 命令提供“有限次数 + 随机抖动”的重试。
//! 任何错误都会重试（包括认证失败），直到用完 `retry.attempts` 次。

use backoff::{backoff::Backoff, ExponentialBackoff};
use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::NetopsError;

/// SSH 命令重试策略：500ms 起步，每次翻倍，不设总时长上限（由尝试次数约束）
pub fn ssh_command_backoff(cfg: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(cfg.initial_interval_ms),
        initial_interval: Duration::from_millis(cfg.initial_interval_ms),
        max_interval: Duration::from_millis(cfg.initial_interval_ms.saturating_mul(16).max(1)),
        multiplier: cfg.multiplier,
        max_elapsed_time: None,
        // 抖动以固定毫秒数叠加，不做比例随机化
        randomization_factor: 0.0,
        ..Default::default()
    }
}

/// 一次调用内的重试状态：记录已尝试次数并给出下一次等待时长
#[derive(Debug)]
pub struct RetryState {
    policy: ExponentialBackoff,
    attempts: u32,
    attempt: u32,
    jitter_ms: u64,
}

impl RetryState {
    pub fn new(cfg: &RetryConfig) -> Self {
        Self {
            policy: ssh_command_backoff(cfg),
            attempts: cfg.attempts.max(1),
            attempt: 1,
            jitter_ms: cfg.jitter_ms,
        }
    }

    /// 当前是第几次尝试（从 1 开始）
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 记录一次失败；尚有剩余次数时返回等待时长（指数退避 + 随机抖动）
    pub fn on_failure(&mut self, err: &NetopsError) -> Option<Duration> {
        if self.attempt >= self.attempts {
            tracing::debug!(attempts = self.attempts, error = %err, "Retry budget exhausted");
            return None;
        }
        self.attempt += 1;
        let base = self
            .policy
            .next_backoff()
            .unwrap_or(self.policy.initial_interval);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Some(base + Duration::from_millis(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> RetryConfig {
        RetryConfig {
            jitter_ms: 0,
            ..RetryConfig::default()
        }
    }

    mod delay_tests {
        use super::*;

        #[test]
        fn test_delay_doubles_until_budget_spent() {
            let mut state = RetryState::new(&exact());
            let err = NetopsError::connection("h", "reset");
            assert_eq!(state.on_failure(&err), Some(Duration::from_millis(500)));
            assert_eq!(state.attempt(), 2);
            assert_eq!(state.on_failure(&err), Some(Duration::from_millis(1000)));
            assert_eq!(state.attempt(), 3);
            assert_eq!(state.on_failure(&err), None);
        }

        #[test]
        fn test_jitter_bounded() {
            let cfg = RetryConfig {
                jitter_ms: 300,
                ..RetryConfig::default()
            };
            for _ in 0..20 {
                let wait = RetryState::new(&cfg)
                    .on_failure(&NetopsError::timeout("exec", 1))
                    .unwrap();
                assert!(wait >= Duration::from_millis(500));
                assert!(wait <= Duration::from_millis(800));
            }
        }
    }

    mod classification_tests {
        use super::*;

        #[test]
        fn test_authentication_failure_is_retried() {
            let mut state = RetryState::new(&exact());
            let wait = state.on_failure(&NetopsError::authentication("10.0.0.1"));
            assert_eq!(wait, Some(Duration::from_millis(500)));
        }

        #[test]
        fn test_any_error_is_retried() {
            let errors = [
                NetopsError::parse("garbled banner"),
                NetopsError::credential("PW3"),
                NetopsError::internal("channel closed"),
            ];
            for err in errors {
                let mut state = RetryState::new(&exact());
                assert!(state.on_failure(&err).is_some(), "{err} should be retried");
            }
        }

        #[test]
        fn test_single_attempt_never_waits() {
            let cfg = RetryConfig {
                attempts: 1,
                ..exact()
            };
            assert_eq!(RetryState::new(&cfg).on_failure(&NetopsError::authentication("h")), None);
        }
    }
}
