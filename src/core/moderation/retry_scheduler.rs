// Retry scheduler - decides whether a failed moderation call is retried and
// how long to wait first.
//
// Rate limits are retried after the requested delay and never consume an
// attempt. Every other failure consumes one attempt and waits on the next
// entry of the backoff sequence. The scheduler only signals exhaustion; the
// orchestrator decides what exhaustion means.

use super::moderation_ports::ModerationError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerConfigError {
    #[error("retry schedule needs at least one backoff delay")]
    EmptySchedule,
}

/// Attempt counter owned by exactly one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub attempts_used: u32,
    pub max_attempts: u32,
}

/// What the run should do after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryScheduler {
    delays: Vec<Duration>,
}

impl RetryScheduler {
    pub fn new(delays: Vec<Duration>) -> Result<Self, SchedulerConfigError> {
        if delays.is_empty() {
            return Err(SchedulerConfigError::EmptySchedule);
        }
        Ok(Self { delays })
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    /// Fresh state for a new run.
    pub fn start(&self) -> AttemptState {
        AttemptState {
            attempts_used: 0,
            max_attempts: self.max_attempts(),
        }
    }

    pub fn next(&self, state: &mut AttemptState, error: &ModerationError) -> RetryDecision {
        if let Some(retry_after) = error.retry_after() {
            return RetryDecision::Retry { after: retry_after };
        }

        state.attempts_used += 1;
        if state.attempts_used < state.max_attempts {
            RetryDecision::Retry {
                after: self.delays[(state.attempts_used - 1) as usize],
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    fn transient() -> ModerationError {
        ModerationError::Request("Groq API returned status 500".to_string())
    }

    fn rate_limited(secs: u64) -> ModerationError {
        ModerationError::RateLimited {
            retry_after: Duration::from_secs(secs),
            message: "slow down".to_string(),
        }
    }

    #[test]
    fn test_empty_schedule_rejected() {
        assert_eq!(
            RetryScheduler::new(Vec::new()).unwrap_err(),
            SchedulerConfigError::EmptySchedule
        );
    }

    #[test]
    fn test_max_attempts_is_schedule_length() {
        let scheduler = RetryScheduler::new(secs(&[1, 2, 4, 8, 16])).unwrap();
        let state = scheduler.start();

        assert_eq!(state.max_attempts, 5);
        assert_eq!(state.attempts_used, 0);
    }

    #[test]
    fn test_transient_failures_walk_the_schedule_then_give_up() {
        let scheduler = RetryScheduler::new(secs(&[1, 2, 4, 8, 16])).unwrap();
        let mut state = scheduler.start();

        let mut waits = Vec::new();
        loop {
            match scheduler.next(&mut state, &transient()) {
                RetryDecision::Retry { after } => waits.push(after),
                RetryDecision::GiveUp => break,
            }
        }

        // Five attempts means four waits between them.
        assert_eq!(waits, secs(&[1, 2, 4, 8]));
        assert_eq!(state.attempts_used, 5);
    }

    #[test]
    fn test_rate_limit_does_not_consume_attempts() {
        let scheduler = RetryScheduler::new(secs(&[2, 4, 8])).unwrap();
        let mut state = scheduler.start();

        for _ in 0..10 {
            let decision = scheduler.next(&mut state, &rate_limited(30));
            assert_eq!(
                decision,
                RetryDecision::Retry {
                    after: Duration::from_secs(30)
                }
            );
        }

        assert_eq!(state.attempts_used, 0);
    }

    #[test]
    fn test_rate_limit_between_failures_keeps_position() {
        let scheduler = RetryScheduler::new(secs(&[2, 4, 8])).unwrap();
        let mut state = scheduler.start();

        assert_eq!(
            scheduler.next(&mut state, &transient()),
            RetryDecision::Retry {
                after: Duration::from_secs(2)
            }
        );
        assert_eq!(
            scheduler.next(&mut state, &rate_limited(7)),
            RetryDecision::Retry {
                after: Duration::from_secs(7)
            }
        );
        assert_eq!(
            scheduler.next(&mut state, &transient()),
            RetryDecision::Retry {
                after: Duration::from_secs(4)
            }
        );
        assert_eq!(scheduler.next(&mut state, &transient()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_single_delay_gives_up_on_first_failure() {
        let scheduler = RetryScheduler::new(secs(&[5])).unwrap();
        let mut state = scheduler.start();

        assert_eq!(scheduler.next(&mut state, &transient()), RetryDecision::GiveUp);
        assert_eq!(state.attempts_used, 1);
    }
}
