//! Queue store contract and backends.
//!
//! The store is the sole arbiter of job ownership: every transition
//! (enqueue, claim, ack, fail, reclaim) is a single atomic operation
//! against it. Workers never touch job state directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_core::{JobId, TenantId, WorkerId};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::Job;

mod fairness;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryQueueStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisQueueStore;

/// Outcome of [`QueueStore::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created(JobId),
    /// An inbound job with the same `(tenant, external id)` already exists.
    Existing(JobId),
}

impl Enqueued {
    pub fn id(&self) -> JobId {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Retryable,
    Permanent,
}

/// Why a handler attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureReason {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }
}

/// Where a failed job goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        attempt: u32,
        available_at: DateTime<Utc>,
    },
    DeadLetter {
        reason: String,
    },
}

/// A dead-lettered job held for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub(crate) fn from_job(job: Job) -> Self {
        let reason = job.last_error.clone().unwrap_or_default();
        let dead_lettered_at = job.finished_at.unwrap_or(job.available_at);
        Self {
            job,
            reason,
            dead_lettered_at,
        }
    }
}

/// A lease returned to the pending set by [`QueueStore::reclaim_expired_leases`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedLease {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub worker_id: WorkerId,
}

/// Per-tenant job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.completed + self.failed + self.dead_lettered
    }
}

/// Persistence contract for queued jobs.
///
/// Implementations must make each method atomic: a failed call leaves no
/// partial state behind and reports `StoreUnavailable`.
pub trait QueueStore: Send + Sync {
    /// Insert a Pending job that becomes claimable at `available_at` (clamped
    /// to no earlier than its enqueue time).
    ///
    /// Inbound jobs are deduplicated on `(tenant, external id)` against any
    /// existing job that is not dead-lettered.
    fn enqueue(
        &self,
        queue: &str,
        job: Job,
        available_at: DateTime<Utc>,
    ) -> Result<Enqueued, QueueError>;

    /// Lease at most one eligible job (`available_at <= now`), rotating across
    /// tenants and taking the oldest `available_at` within a tenant.
    fn claim(
        &self,
        queue: &str,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError>;

    /// Mark an in-flight job Completed. Fails with `NotInFlight` unless
    /// `worker` holds an unexpired lease on it.
    fn ack(&self, job_id: JobId, worker: &WorkerId) -> Result<(), QueueError>;

    /// Record a failed attempt and apply `next` in the same step.
    ///
    /// `Retry` moves the job from InFlight back to Pending with the new
    /// attempt and availability; the attempt must move forward. `DeadLetter`
    /// moves it to DeadLettered and releases its dedup key. Fails with
    /// `NotInFlight` unless `worker` holds an unexpired lease, in which case
    /// nothing changes and lease reclamation still owns the job.
    fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        reason: &FailureReason,
        next: &RetryDecision,
    ) -> Result<Job, QueueError>;

    /// Return every InFlight job whose lease has passed to Pending with
    /// `available_at = now`. The attempt counter is left alone.
    fn reclaim_expired_leases(&self, queue: &str) -> Result<Vec<ReclaimedLease>, QueueError>;

    /// Look up a job owned by `tenant`.
    fn get(&self, tenant: &TenantId, job_id: JobId) -> Result<Option<Job>, QueueError>;

    /// Dead letters of `tenant`, oldest first.
    fn list_dead_letters(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, QueueError>;

    /// Enqueue a fresh copy of a dead-lettered job (new id, attempt 0) on the
    /// queue it came from. The original stays dead-lettered.
    fn replay_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<JobId, QueueError>;

    fn delete_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<(), QueueError>;

    fn stats(&self, tenant: &TenantId) -> Result<QueueStats, QueueError>;

    /// Number of Pending jobs in `queue`, eligible or delayed.
    fn depth(&self, queue: &str) -> Result<usize, QueueError>;

    /// Remove Completed jobs finished before `older_than`, releasing their
    /// dedup keys. Returns how many were removed.
    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError>;
}
