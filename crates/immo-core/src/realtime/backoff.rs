//! Reconnect backoff policy and bookkeeping

use immo_types::ReconnectSettings;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff: `base_delay * 2^attempt`, clamped to `max_delay`,
/// for at most `max_attempts` consecutive automatic attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectSettings::default().into()
    }
}

impl From<ReconnectSettings> for ReconnectPolicy {
    fn from(settings: ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_attempts: settings.max_attempts,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    attempt_count: u32,
    scheduled_at: Option<Instant>,
    last_delay: Option<Duration>,
}

impl ReconnectState {
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn scheduled_at(&self) -> Option<Instant> {
        self.scheduled_at
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    pub fn is_exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempt_count >= policy.max_attempts
    }

    /// Reserve the next automatic attempt. Returns `None` once the budget
    /// is spent.
    pub fn schedule_next(&mut self, policy: &ReconnectPolicy, now: Instant) -> Option<Duration> {
        if self.is_exhausted(policy) {
            return None;
        }

        let delay = policy.delay_for(self.attempt_count);
        self.attempt_count += 1;
        self.scheduled_at = Some(now + delay);
        self.last_delay = Some(delay);
        Some(delay)
    }

    pub fn clear_schedule(&mut self) {
        self.scheduled_at = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_attempts,
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_delays_double_per_attempt() {
        let policy = policy(500, 5);
        let mut state = ReconnectState::default();
        let now = Instant::now();

        let delays: Vec<_> = (0..3)
            .map(|_| state.schedule_next(&policy, now).unwrap())
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000)
            ]
        );
        assert_eq!(state.attempt_count(), 3);
        assert_eq!(state.scheduled_at(), Some(now + Duration::from_millis(2000)));
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = policy(100, 2);
        let mut state = ReconnectState::default();
        let now = Instant::now();

        assert!(state.schedule_next(&policy, now).is_some());
        assert!(state.schedule_next(&policy, now).is_some());
        assert!(state.schedule_next(&policy, now).is_none());
        assert!(state.is_exhausted(&policy));
        assert_eq!(state.attempt_count(), 2);
    }

    #[test]
    fn test_reset_restarts_cycle() {
        let policy = policy(100, 5);
        let mut state = ReconnectState::default();
        let now = Instant::now();

        state.schedule_next(&policy, now);
        state.schedule_next(&policy, now);
        state.reset();

        assert_eq!(state.attempt_count(), 0);
        assert!(state.scheduled_at().is_none());
        assert_eq!(state.schedule_next(&policy, now), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_delay_is_clamped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_attempts: 100,
            max_delay: Duration::from_secs(30),
        };

        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(64), Duration::from_secs(30));
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 5);
    }
}
