// ABOUTME: Reconnection policy with capped backoff and an attempt ceiling
//
// The policy computes `min(base * attempt, max)` for attempts 1..=max_attempts
// and refuses anything past the ceiling. RetryHandle owns the scheduled reopen
// task for a channel and aborts it when dropped, so replacing or clearing the
// slot cancels the timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Reference delay before the first reconnect attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Reference cap on the reconnect delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Reference ceiling on consecutive reconnect attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff policy for reconnect-eligible channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay unit, multiplied by the attempt number
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Attempts allowed before the failure becomes terminal
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with explicit bounds
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay for the given 1-based attempt, or `None` past the ceiling
    ///
    /// Returns `min(base * attempt, max)`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        // Saturating so a huge base cannot overflow before the cap applies
        let base_millis = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_millis.saturating_mul(u64::from(attempt)));

        Some(std::cmp::min(delay, self.max_delay))
    }

    /// Whether another attempt is allowed after `attempts` have been used
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}

/// Owned handle to a scheduled reopen
///
/// Dropping the handle aborts the timer task.
#[derive(Debug)]
pub struct RetryHandle {
    /// Attempt number this retry belongs to
    attempt: u32,

    /// Delay the timer was armed with
    delay: Duration,

    task: JoinHandle<()>,
}

impl RetryHandle {
    /// Arm a timer that runs `fire` after `delay`
    ///
    /// Fails when called outside a Tokio runtime.
    pub fn schedule<F>(attempt: u32, delay: Duration, fire: F) -> Result<Self, TryCurrentError>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = Handle::try_current()?;
        // Deadline is fixed at arm time, not at the task's first poll
        let deadline = Instant::now() + delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire();
        });

        Ok(Self {
            attempt,
            delay,
            task,
        })
    }

    /// Attempt number this retry belongs to
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the timer was armed with
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether the timer task has already finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the timer
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for RetryHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    // ==================== ReconnectPolicy Tests ====================

    #[test]
    fn test_default_policy_matches_reference() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.base_delay, Duration::from_millis(2000));
        assert_eq!(policy.max_delay, Duration::from_millis(10_000));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_delay_sequence_is_capped() {
        let policy = ReconnectPolicy::default();

        let delays: Vec<_> = (1..=5).filter_map(|attempt| policy.delay_for(attempt)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(6000),
                Duration::from_millis(8000),
                Duration::from_millis(10_000),
            ]
        );
    }

    #[test]
    fn test_delay_cap_applies_before_ceiling() {
        let policy =
            ReconnectPolicy::new(Duration::from_millis(2000), Duration::from_millis(10_000), 8);

        assert_eq!(policy.delay_for(6), Some(Duration::from_millis(10_000)));
        assert_eq!(policy.delay_for(8), Some(Duration::from_millis(10_000)));
        assert_eq!(policy.delay_for(9), None);
    }

    #[test]
    fn test_delay_refuses_past_ceiling_and_zero() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(6), None);
        assert!(policy.allows(5));
        assert!(!policy.allows(6));
        assert!(!policy.allows(0));
    }

    #[test]
    fn test_delay_overflow_protection() {
        let policy = ReconnectPolicy::new(Duration::MAX, Duration::from_secs(30), u32::MAX);

        assert_eq!(policy.delay_for(u32::MAX), Some(Duration::from_secs(30)));
    }

    // ==================== RetryHandle Tests ====================

    #[test]
    fn test_retry_handle_requires_runtime() {
        let result = RetryHandle::schedule(1, Duration::from_secs(1), || {});

        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_handle_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let handle = RetryHandle::schedule(1, Duration::from_secs(2), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(handle.attempt(), 1);
        assert_eq!(handle.delay(), Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_handle_cancel_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let handle = RetryHandle::schedule(1, Duration::from_secs(2), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_handle_deadline_counts_from_schedule() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let _handle = RetryHandle::schedule(1, Duration::from_secs(2), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        // Clock moves before the timer task is ever polled
        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(fired.load(Ordering::SeqCst));
    }
}
