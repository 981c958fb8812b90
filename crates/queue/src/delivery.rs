//! Outbound delivery: adapts a provider send API into a [`JobHandler`].

use async_trait::async_trait;
use tracing::debug;

use crate::handler::{JobHandler, JobResult};
use crate::job::{Direction, Job};

/// Errors a messaging provider can report for a send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider timed out")]
    Timeout,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("content rejected: {0}")]
    ContentRejected(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::Unavailable(_)
        )
    }
}

impl From<DeliveryError> for JobResult {
    fn from(err: DeliveryError) -> Self {
        if err.is_retryable() {
            JobResult::Retryable(err.to_string())
        } else {
            JobResult::Permanent(err.to_string())
        }
    }
}

/// External send API for outbound messages.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Send the job's content to its counterparty. Returns the provider's
    /// message id.
    async fn send(&self, job: &Job) -> Result<String, DeliveryError>;
}

/// Handler for outbound jobs that sends through a [`DeliveryProvider`].
pub struct DeliveryHandler<P> {
    provider: P,
}

impl<P> DeliveryHandler<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> JobHandler for DeliveryHandler<P>
where
    P: DeliveryProvider,
{
    async fn handle(&self, job: &Job) -> JobResult {
        if job.direction() != Direction::Outbound {
            return JobResult::permanent("delivery handler received an inbound job");
        }
        match self.provider.send(job).await {
            Ok(provider_id) => {
                debug!(
                    job_id = %job.id(),
                    tenant_id = %job.tenant_id(),
                    provider_message_id = %provider_id,
                    "message delivered"
                );
                JobResult::Success
            }
            Err(err) => err.into(),
        }
    }
}
