//! Job handlers and their registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::TenantId;

use crate::job::{Direction, Job};
use crate::store::FailureReason;

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Transient failure (rate limit, timeout, provider 5xx). Retried with backoff.
    Retryable(String),
    /// Will never succeed (malformed content, invalid recipient). Dead-lettered.
    Permanent(String),
}

impl JobResult {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self::Retryable(detail.into())
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::Permanent(detail.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// `None` for success.
    pub fn into_failure(self) -> Option<FailureReason> {
        match self {
            Self::Success => None,
            Self::Retryable(detail) => Some(FailureReason::retryable(detail)),
            Self::Permanent(detail) => Some(FailureReason::permanent(detail)),
        }
    }
}

/// Application logic for a job.
///
/// Delivery is at-least-once: a handler may see the same job again after a
/// crash or lease loss, so side effects must be idempotent on the target.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`JobHandler`].
///
/// ```ignore
/// registry.register_default(Direction::Inbound, handler_fn(|job| async move {
///     route_to_bot(job).await
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> JobResult {
        (self.f)(job.clone()).await
    }
}

/// Resolves the handler for a job's `(tenant, direction)`.
///
/// Exact tenant registrations win over the per-direction default.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    exact: HashMap<(TenantId, Direction), Arc<dyn JobHandler>>,
    defaults: HashMap<Direction, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, tenant: TenantId, direction: Direction, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        self.exact.insert((tenant, direction), Arc::new(handler));
        self
    }

    pub fn register_default<H>(&mut self, direction: Direction, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        self.defaults.insert(direction, Arc::new(handler));
        self
    }

    pub fn resolve(&self, tenant: &TenantId, direction: Direction) -> Option<Arc<dyn JobHandler>> {
        self.exact
            .get(&(tenant.clone(), direction))
            .or_else(|| self.defaults.get(&direction))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.defaults.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("exact", &self.exact.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults.keys().collect::<Vec<_>>())
            .finish()
    }
}
