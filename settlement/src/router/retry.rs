//! Retry classification and exponential backoff
//!
//! Retries never block the caller: a transient failure books `next_retry_at`
//! on the record and a sweep picks it up later.

use crate::adapters::{message_signals_transient, AdapterError};
use crate::config::RouterConfig;
use crate::types::SettlementFailure;
use chrono::{DateTime, Duration, Utc};

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Book another attempt
    Retry {
        /// When the sweep may pick it up
        next_retry_at: DateTime<Utc>,
        /// Delay applied
        delay: Duration,
    },
    /// Transient, but the ceiling is reached
    Exhausted,
    /// Business failure, never retried
    Terminal,
}

/// Backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    min_backoff_seconds: u64,
    max_backoff_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

impl RetryPolicy {
    /// Policy from router settings
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            min_backoff_seconds: config.min_backoff_seconds.max(1),
            max_backoff_seconds: config.max_backoff_seconds.max(config.min_backoff_seconds.max(1)),
        }
    }

    /// `2^retry_count` seconds, floored at the minimum and capped at the maximum
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let secs = 1u64
            .checked_shl(retry_count)
            .unwrap_or(u64::MAX)
            .max(self.min_backoff_seconds)
            .min(self.max_backoff_seconds);
        Duration::seconds(secs as i64)
    }

    /// Rail-reported retryable flag, or a transient signal in the message
    pub fn is_retryable(&self, failure: &SettlementFailure) -> bool {
        failure.retryable || message_signals_transient(&failure.message)
    }

    /// Decide the fate of a failed attempt; `retry_count` is the count before this failure
    pub fn decide(
        &self,
        failure: &SettlementFailure,
        retry_count: u32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if !self.is_retryable(failure) {
            return RetryDecision::Terminal;
        }
        if retry_count >= max_retries {
            return RetryDecision::Exhausted;
        }
        let delay = self.backoff(retry_count);
        RetryDecision::Retry {
            next_retry_at: now + delay,
            delay,
        }
    }
}

/// Structured failure for an adapter error
pub fn failure_from_adapter(err: &AdapterError) -> SettlementFailure {
    SettlementFailure::new(err.code(), err.to_string(), err.is_transient())
}
