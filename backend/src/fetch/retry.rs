//! Retry schedule for rate-limited upstreams.

use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Where a fetch is in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Request number `n` (0-based) is about to be sent.
    Attempting(u32),
    /// Waiting before retry `n` (1-based).
    Backoff(u32, Duration),
    Succeeded,
    Failed,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::Failed)
    }
}

/// Classification of one HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RateLimited,
    Failure,
}

impl AttemptOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => AttemptOutcome::Success,
            429 => AttemptOutcome::RateLimited,
            _ => AttemptOutcome::Failure,
        }
    }
}

/// Exponential backoff: `initial_delay * 2^(retry - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Advance the state machine by one step.
    ///
    /// Only `Attempting` consumes an outcome; `Backoff` always leads to the next
    /// attempt and terminal states stay put.
    pub fn next(&self, state: RetryState, outcome: AttemptOutcome) -> RetryState {
        match state {
            RetryState::Attempting(attempt) => match outcome {
                AttemptOutcome::Success => RetryState::Succeeded,
                AttemptOutcome::RateLimited if attempt < self.max_retries => {
                    let retry = attempt + 1;
                    RetryState::Backoff(retry, self.delay_for(retry))
                }
                AttemptOutcome::RateLimited | AttemptOutcome::Failure => RetryState::Failed,
            },
            RetryState::Backoff(retry, _) => RetryState::Attempting(retry),
            terminal => terminal,
        }
    }

    /// Backoff delays a request would go through if every attempt were rate limited.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut state = RetryState::Attempting(0);
        while !state.is_terminal() {
            state = self.next(state, AttemptOutcome::RateLimited);
            if let RetryState::Backoff(_, delay) = state {
                delays.push(delay);
            }
        }
        delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_429_sequence() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::Attempting(0);

        state = policy.next(state, AttemptOutcome::RateLimited);
        assert_eq!(state, RetryState::Backoff(1, Duration::from_secs(1)));
        state = policy.next(state, AttemptOutcome::RateLimited);
        assert_eq!(state, RetryState::Attempting(1));
        state = policy.next(state, AttemptOutcome::RateLimited);
        assert_eq!(state, RetryState::Backoff(2, Duration::from_secs(2)));
        state = policy.next(policy.next(state, AttemptOutcome::Success), AttemptOutcome::Success);
        assert_eq!(state, RetryState::Succeeded);
    }

    #[test]
    fn test_failure_is_terminal() {
        let policy = RetryPolicy::default();
        let state = policy.next(RetryState::Attempting(0), AttemptOutcome::Failure);
        assert_eq!(state, RetryState::Failed);
        assert_eq!(policy.next(state, AttemptOutcome::Success), RetryState::Failed);
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert!(policy.schedule().is_empty());
        assert_eq!(
            policy.next(RetryState::Attempting(0), AttemptOutcome::RateLimited),
            RetryState::Failed
        );
    }
}
