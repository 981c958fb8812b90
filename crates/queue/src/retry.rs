//! Retry and backoff decisions for failed jobs.

use std::time::Duration;

use convoy_core::WorkerId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{self, SharedClock};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{self, QueueEvent, SharedObserver};
use crate::job::Job;
use crate::store::{FailureReason, QueueStore};
pub use crate::store::RetryDecision;

/// Exponential backoff with additive jitter.
///
/// `delay(n) = min(base * 2^n + jitter, max_delay)` where jitter is drawn
/// uniformly from `0..=base * 2^n * jitter_fraction`. The delay is therefore
/// never below `min(base * 2^n, max_delay)` and never above `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total handler attempts allowed, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the exponential delay added at random (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_backoff,
            max_delay: config.max_backoff,
            jitter: config.backoff_jitter,
        }
    }

    /// Exponential delay for `attempt` (0-indexed) without jitter, capped.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay before retry number `attempt + 1`, with jitter.
    pub fn delay_for_attempt<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = self.base_delay_for(attempt);
        let fraction = self.jitter.clamp(0.0, 1.0);
        if fraction == 0.0 || exp.is_zero() {
            return exp;
        }
        let extra = exp.mul_f64(fraction * rng.gen_range(0.0..=1.0));
        exp.saturating_add(extra).min(self.max_delay)
    }

    /// Whether a job that just failed on `attempt` gets another one.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }
}

/// Applies [`RetryPolicy`] to failed jobs and records the outcome in the store.
pub struct RetryController {
    policy: RetryPolicy,
    clock: SharedClock,
    observer: Option<SharedObserver>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, clock: SharedClock) -> Self {
        Self {
            policy,
            clock,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide the next step for a job that failed on its current attempt.
    pub fn decide(&self, job: &Job, failure: &FailureReason) -> RetryDecision {
        self.decide_with(job, failure, &mut rand::thread_rng())
    }

    pub fn decide_with<R: Rng + ?Sized>(
        &self,
        job: &Job,
        failure: &FailureReason,
        rng: &mut R,
    ) -> RetryDecision {
        if !failure.is_retryable() {
            return RetryDecision::DeadLetter {
                reason: format!("permanent failure: {}", failure.detail),
            };
        }
        if !self.policy.should_retry(job.attempt()) {
            return RetryDecision::DeadLetter {
                reason: format!(
                    "attempts exhausted ({}): {}",
                    self.policy.max_attempts, failure.detail
                ),
            };
        }

        let delay = self.policy.delay_for_attempt(job.attempt(), rng);
        RetryDecision::Retry {
            attempt: job.attempt() + 1,
            available_at: clock::after(self.clock.now(), delay),
        }
    }

    /// Decide and apply: `job` is the copy `worker` claimed, still leased in
    /// `store`. The failure and the decision land in one store call, so a
    /// store error leaves the job InFlight for lease reclamation.
    pub fn handle_failure(
        &self,
        store: &dyn QueueStore,
        job: &Job,
        worker: &WorkerId,
        failure: &FailureReason,
    ) -> Result<RetryDecision, QueueError> {
        let decision = self.decide(job, failure);
        store.fail(job.id(), worker, failure, &decision)?;

        match &decision {
            RetryDecision::Retry {
                attempt,
                available_at,
            } => {
                debug!(
                    job_id = %job.id(),
                    tenant_id = %job.tenant_id(),
                    attempt,
                    available_at = %available_at,
                    error = %failure.detail,
                    "retry scheduled"
                );
                events::emit(
                    self.observer.as_ref(),
                    QueueEvent::RetryScheduled {
                        job_id: job.id(),
                        tenant_id: job.tenant_id().clone(),
                        attempt: *attempt,
                        available_at: *available_at,
                        error: failure.detail.clone(),
                    },
                );
            }
            RetryDecision::DeadLetter { reason } => {
                warn!(
                    job_id = %job.id(),
                    tenant_id = %job.tenant_id(),
                    direction = %job.direction(),
                    attempt = job.attempt(),
                    reason = %reason,
                    "job dead-lettered"
                );
                events::emit(
                    self.observer.as_ref(),
                    QueueEvent::JobDeadLettered {
                        job_id: job.id(),
                        tenant_id: job.tenant_id().clone(),
                        direction: job.direction(),
                        attempt: job.attempt(),
                        reason: reason.clone(),
                    },
                );
            }
        }

        Ok(decision)
    }
}

impl core::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryController")
            .field("policy", &self.policy)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
