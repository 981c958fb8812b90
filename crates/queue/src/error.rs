//! Queue error taxonomy.

use convoy_core::{DomainError, JobId};

use crate::job::JobStatus;

/// Errors surfaced by the producer, the stores and the worker pool.
///
/// Handler failures are not errors here: they are `JobResult` values that
/// drive the retry controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Malformed or incomplete submission. Never enqueued.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Persistence layer unreachable or failed. Callers retry with their own backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The job is not leased to the caller (lease expired, reclaimed, or never held).
    #[error("job {0} is not in flight for this worker")]
    NotInFlight(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job belongs to another tenant.
    #[error("tenant isolation violation")]
    TenantIsolation,

    /// The requested transition is not allowed from the job's current status.
    #[error("job {job_id} is {status:?}; transition not allowed")]
    InvalidState { job_id: JobId, status: JobStatus },
}

impl QueueError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Whether the caller may reasonably retry the same call later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<DomainError> for QueueError {
    fn from(err: DomainError) -> Self {
        Self::InvalidJob(err.detail().to_string())
    }
}
