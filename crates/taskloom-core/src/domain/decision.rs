//! Decision model: what to do with a task after an attempt.
//!
//! This module defines the Decision type (what to do next) and the Decider trait
//! (how to determine the next action based on attempts and outcome).

use std::time::Duration;

use super::outcome::Outcome;
use super::retry::RetryPolicy;

/// The next action to take for a task after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The occurrence succeeded.
    Complete,

    /// Run again after `delay`. `attempt` is the attempt that just failed.
    Retry { delay: Duration, attempt: u32 },

    /// Attempts exhausted; the task becomes terminally `Failed`.
    GiveUp { attempts: u32, reason: String },
}

/// Trait for deciding the next action based on attempt count and outcome.
///
/// Deciders are pure functions: given the attempt count and observation,
/// they return the next action without side effects. The scheduler applies it.
pub trait Decider: Send + Sync {
    fn decide(&self, attempts: u32, outcome: &Outcome) -> Decision;
}

/// Attempt-based retry with exponential backoff:
/// - Complete on success
/// - Retry if attempts < max_attempts
/// - Give up if attempts >= max_attempts
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, attempts: u32, outcome: &Outcome) -> Decision {
        if outcome.kind.is_success() {
            return Decision::Complete;
        }
        if self.retry_policy.is_exhausted(attempts) {
            Decision::GiveUp {
                attempts,
                reason: format!(
                    "Max attempts reached: {}/{} ({})",
                    attempts,
                    self.retry_policy.max_attempts,
                    outcome.detail.as_deref().unwrap_or(outcome.kind.as_str())
                ),
            }
        } else {
            Decision::Retry {
                delay: self.retry_policy.next_delay(attempts),
                attempt: attempts,
            }
        }
    }
}
