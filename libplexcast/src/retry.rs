//! Retry and backoff policy for queue items
//!
//! Retryable failures put an item back into `pending` with `next_retry_at`
//! pushed out by an exponential delay: the first retry waits `base_delay`,
//! each further retry doubles it, capped at `max_delay`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::PublishError;
use crate::platforms::{capabilities, PlatformId};
use crate::types::{PublishQueueItem, QueueStatus};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3600);

// 2^20 * base already exceeds any sane cap
const MAX_BACKOFF_EXPONENT: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Global default; `None` uses each platform's capability default
    pub max_retries: Option<u32>,
    pub platform_max_retries: HashMap<PlatformId, u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: None,
            platform_max_retries: HashMap::new(),
        }
    }
}

/// What happened to an item after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back to pending, eligible again at `next_retry_at`
    Retry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Terminal; no further automatic attempts
    Failed,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_platform_max_retries(mut self, platform: PlatformId, max_retries: u32) -> Self {
        self.platform_max_retries.insert(platform, max_retries);
        self
    }

    /// Retry bound assigned to new queue items for `platform`
    pub fn max_retries_for(&self, platform: PlatformId) -> u32 {
        self.platform_max_retries
            .get(&platform)
            .copied()
            .or(self.max_retries)
            .unwrap_or_else(|| capabilities(platform).default_max_retries)
    }

    /// Delay before retry number `retries_so_far + 1`
    pub fn delay_for(&self, retries_so_far: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        let max_millis = self.max_delay.as_millis() as u64;

        let multiplier = 2_u64.saturating_pow(retries_so_far.min(MAX_BACKOFF_EXPONENT));
        Duration::from_millis(base_millis.saturating_mul(multiplier).min(max_millis))
    }

    /// Record a failed attempt on `item`
    ///
    /// The item must be the one that was just dispatched. Retryable errors
    /// with budget left re-enter `pending`; everything else is terminal.
    pub fn apply_failure(
        &self,
        item: &mut PublishQueueItem,
        error: &PublishError,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        item.last_error = Some(error.to_string());

        if error.is_retryable() && item.retry_count < item.max_retries {
            let delay = self.delay_for(item.retry_count);
            let next_retry_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);

            item.retry_count += 1;
            item.next_retry_at = Some(next_retry_at);
            item.status = QueueStatus::Pending;

            info!(
                "Retry {}/{} for {} item {} scheduled at {} ({})",
                item.retry_count, item.max_retries, item.platform, item.id, next_retry_at, error
            );

            FailureOutcome::Retry {
                retry_count: item.retry_count,
                next_retry_at,
            }
        } else {
            item.status = QueueStatus::Failed;
            item.next_retry_at = None;

            if error.is_retryable() {
                warn!(
                    "{} item {} failed after {} retries: {}",
                    item.platform, item.id, item.retry_count, error
                );
            } else {
                warn!(
                    "{} item {} failed permanently: {}",
                    item.platform, item.id, error
                );
            }

            FailureOutcome::Failed
        }
    }
}
