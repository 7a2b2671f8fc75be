//! Per-task retry bookkeeping and capped exponential backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Class of transient fault, each with its own retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The request was sent but no response arrived in time.
    Read,
    /// No connection could be established.
    Connect,
    /// The server answered 429, 502, 503 or 504.
    Status,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureCategory::Read => "read",
            FailureCategory::Connect => "connect",
            FailureCategory::Status => "status",
        })
    }
}

/// Immutable backoff configuration shared by every tracker of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base of the exponential: `factor * 2^failures` seconds.
    pub backoff_factor: f64,
    /// Upper bound on a single sleep, in seconds.
    ///
    /// `f64::INFINITY` means uncapped; the sleep then saturates at
    /// [`Duration::MAX`]. NaN and negative values disable backoff.
    pub max_backoff_seconds: f64,
    /// Retries allowed per [`FailureCategory`].
    pub max_retries_per_category: u32,
    /// Draw the sleep uniformly from `[0, computed]`.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_factor: 0.5,
            max_backoff_seconds: 30.0,
            max_retries_per_category: 10,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Policy that never sleeps; handy for tests and dry runs.
    pub fn immediate(max_retries_per_category: u32) -> Self {
        Self {
            backoff_factor: 0.0,
            max_backoff_seconds: 0.0,
            max_retries_per_category,
            jitter: false,
        }
    }

    fn cap(&self) -> f64 {
        if self.max_backoff_seconds.is_nan() {
            0.0
        } else {
            self.max_backoff_seconds.max(0.0)
        }
    }

    /// Backoff in seconds after `failures` failures, before jitter.
    ///
    /// Always within `[0, max_backoff_seconds]`.
    pub fn base_seconds(&self, failures: u32) -> f64 {
        let cap = self.cap();
        let exp = 2f64.powi(failures.min(1023) as i32);
        let raw = self.backoff_factor * exp;
        if raw.is_nan() || raw <= 0.0 {
            0.0
        } else {
            raw.min(cap)
        }
    }
}

/// Mutable retry counters owned by one task.
///
/// Cloning yields independent counters over the same shared policy; that is
/// how each half of a split gets its own budget.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    read: u32,
    connect: u32,
    status: u32,
    policy: Arc<BackoffPolicy>,
}

impl RetryTracker {
    /// Fresh tracker with zero counters.
    pub fn new(policy: Arc<BackoffPolicy>) -> Self {
        Self {
            read: 0,
            connect: 0,
            status: 0,
            policy,
        }
    }

    /// Records a failure in `category` and reports whether another attempt is allowed.
    pub fn should_retry(&mut self, category: FailureCategory) -> bool {
        let counter = match category {
            FailureCategory::Read => &mut self.read,
            FailureCategory::Connect => &mut self.connect,
            FailureCategory::Status => &mut self.status,
        };
        *counter = counter.saturating_add(1);
        *counter <= self.policy.max_retries_per_category
    }

    /// Failures recorded in `category`.
    pub fn failures(&self, category: FailureCategory) -> u32 {
        match category {
            FailureCategory::Read => self.read,
            FailureCategory::Connect => self.connect,
            FailureCategory::Status => self.status,
        }
    }

    /// Failures across all categories.
    pub fn total_failures(&self) -> u32 {
        self.read
            .saturating_add(self.connect)
            .saturating_add(self.status)
    }

    /// Sleep to take before the next attempt.
    pub fn backoff_duration(&self) -> Duration {
        let base = self.policy.base_seconds(self.total_failures());
        let secs = if self.policy.jitter && base > 0.0 && base.is_finite() {
            rand::thread_rng().gen_range(0.0..=base)
        } else {
            base
        };
        Duration::try_from_secs_f64(secs.clamp(0.0, self.policy.cap())).unwrap_or(Duration::MAX)
    }

    /// Independent copy for one half of a split.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Policy shared with sibling trackers.
    pub fn policy(&self) -> &Arc<BackoffPolicy> {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> Arc<BackoffPolicy> {
        Arc::new(BackoffPolicy {
            backoff_factor: 0.5,
            max_backoff_seconds: 4.0,
            max_retries_per_category: max_retries,
            jitter: false,
        })
    }

    #[test]
    fn budget_is_per_category() {
        let mut tracker = RetryTracker::new(policy(2));
        assert!(tracker.should_retry(FailureCategory::Read));
        assert!(tracker.should_retry(FailureCategory::Read));
        assert!(!tracker.should_retry(FailureCategory::Read));
        assert!(tracker.should_retry(FailureCategory::Connect));
        assert!(tracker.should_retry(FailureCategory::Status));
        assert_eq!(tracker.failures(FailureCategory::Read), 3);
        assert_eq!(tracker.total_failures(), 5);
    }

    #[test]
    fn backoff_grows_then_caps() {
        let mut tracker = RetryTracker::new(policy(100));
        assert_eq!(tracker.backoff_duration(), Duration::from_millis(500));
        tracker.should_retry(FailureCategory::Status);
        assert_eq!(tracker.backoff_duration(), Duration::from_secs(1));
        tracker.should_retry(FailureCategory::Read);
        assert_eq!(tracker.backoff_duration(), Duration::from_secs(2));
        for _ in 0..50 {
            tracker.should_retry(FailureCategory::Connect);
        }
        assert_eq!(tracker.backoff_duration(), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = Arc::new(BackoffPolicy {
            jitter: true,
            ..BackoffPolicy::default()
        });
        let mut tracker = RetryTracker::new(policy);
        for _ in 0..40 {
            tracker.should_retry(FailureCategory::Status);
            let sleep = tracker.backoff_duration();
            assert!(sleep <= Duration::from_secs(30));
        }
    }

    #[test]
    fn degenerate_policies_never_go_negative() {
        let negative = BackoffPolicy {
            backoff_factor: -3.0,
            max_backoff_seconds: 10.0,
            max_retries_per_category: 1,
            jitter: false,
        };
        assert_eq!(negative.base_seconds(4), 0.0);
        let unbounded = BackoffPolicy {
            backoff_factor: 1.0,
            max_backoff_seconds: f64::INFINITY,
            max_retries_per_category: 1,
            jitter: false,
        };
        assert_eq!(unbounded.base_seconds(3), 8.0);
        let undefined = BackoffPolicy {
            max_backoff_seconds: f64::NAN,
            ..unbounded.clone()
        };
        assert_eq!(undefined.base_seconds(3), 0.0);
        assert_eq!(BackoffPolicy::immediate(3).base_seconds(9), 0.0);
    }

    #[test]
    fn oversized_backoff_saturates_instead_of_panicking() {
        for jitter in [false, true] {
            for cap in [1e20, f64::INFINITY] {
                let policy = Arc::new(BackoffPolicy {
                    backoff_factor: 1e20,
                    max_backoff_seconds: cap,
                    max_retries_per_category: 10,
                    jitter,
                });
                let mut tracker = RetryTracker::new(policy);
                tracker.should_retry(FailureCategory::Status);
                if !jitter {
                    assert_eq!(tracker.backoff_duration(), Duration::MAX);
                } else {
                    let _ = tracker.backoff_duration();
                }
            }
        }
    }

    #[test]
    fn copies_do_not_share_counters() {
        let mut left = RetryTracker::new(policy(3));
        left.should_retry(FailureCategory::Status);
        let mut right = left.copy();
        left.should_retry(FailureCategory::Status);
        left.should_retry(FailureCategory::Status);
        assert_eq!(left.failures(FailureCategory::Status), 3);
        assert_eq!(right.failures(FailureCategory::Status), 1);
        assert!(right.should_retry(FailureCategory::Status));
        assert!(Arc::ptr_eq(left.policy(), right.policy()));
    }
}
