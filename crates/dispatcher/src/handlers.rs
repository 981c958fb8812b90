//! Default handlers wired into the dispatcher until tenants register their
//! own.

use async_trait::async_trait;
use convoy_queue::{
    DeliveryError, DeliveryHandler, DeliveryProvider, Direction, HandlerRegistry, Job,
    JobHandler, JobResult,
};
use tracing::info;

/// Records inbound messages in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct InboundLogger;

#[async_trait]
impl JobHandler for InboundLogger {
    async fn handle(&self, job: &Job) -> JobResult {
        let content = match serde_json::to_string(job.content()) {
            Ok(json) => json,
            Err(err) => return JobResult::permanent(format!("unserializable content: {err}")),
        };
        info!(
            job_id = %job.id(),
            tenant_id = %job.tenant_id(),
            from = %job.counterparty(),
            external_message_id = job.external_message_id().unwrap_or_default(),
            attempt = job.attempt(),
            content = %content,
            "inbound message received"
        );
        JobResult::Success
    }
}

/// Provider that logs instead of sending. Stands in for the real messaging
/// API in local runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyProvider;

#[async_trait]
impl DeliveryProvider for LogOnlyProvider {
    async fn send(&self, job: &Job) -> Result<String, DeliveryError> {
        if job.counterparty().trim().is_empty() {
            return Err(DeliveryError::InvalidRecipient(job.counterparty().to_string()));
        }
        info!(
            job_id = %job.id(),
            tenant_id = %job.tenant_id(),
            to = %job.counterparty(),
            kind = job.content().kind_name(),
            "outbound message (log only)"
        );
        Ok(format!("log-{}", job.id()))
    }
}

/// Registry with the logging defaults for both directions.
pub fn default_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers
        .register_default(Direction::Inbound, InboundLogger)
        .register_default(Direction::Outbound, DeliveryHandler::new(LogOnlyProvider));
    handlers
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use convoy_queue::{MessageContent, TenantId};

    use super::*;

    #[tokio::test]
    async fn defaults_cover_both_directions() {
        let handlers = default_handlers();
        let tenant = TenantId::new("t1");

        let inbound = Job::inbound(
            tenant.clone(),
            "+1",
            "+2",
            "m1",
            MessageContent::text("hi"),
            Utc::now(),
        );
        let outbound = Job::outbound(tenant.clone(), "+3", None, MessageContent::text("yo"), Utc::now());

        let h = handlers.resolve(&tenant, Direction::Inbound).unwrap();
        assert_eq!(h.handle(&inbound).await, JobResult::Success);
        let h = handlers.resolve(&tenant, Direction::Outbound).unwrap();
        assert_eq!(h.handle(&outbound).await, JobResult::Success);
    }
}
