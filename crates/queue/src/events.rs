//! Lifecycle notifications published by the queue core.
//!
//! Events are emitted after the store has committed the transition, so an
//! observer that drops or fails never affects job state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use convoy_core::{JobId, TenantId, WorkerId};
use convoy_events::{EventBus, TenantScoped};
use serde::Serialize;

use crate::job::Direction;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    JobEnqueued {
        job_id: JobId,
        tenant_id: TenantId,
        direction: Direction,
        queue: String,
        available_at: DateTime<Utc>,
    },
    JobCompleted {
        job_id: JobId,
        tenant_id: TenantId,
        attempt: u32,
    },
    RetryScheduled {
        job_id: JobId,
        tenant_id: TenantId,
        attempt: u32,
        available_at: DateTime<Utc>,
        error: String,
    },
    JobDeadLettered {
        job_id: JobId,
        tenant_id: TenantId,
        direction: Direction,
        attempt: u32,
        reason: String,
    },
    LeaseReclaimed {
        job_id: JobId,
        tenant_id: TenantId,
        queue: String,
        worker_id: WorkerId,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobEnqueued { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::RetryScheduled { job_id, .. }
            | Self::JobDeadLettered { job_id, .. }
            | Self::LeaseReclaimed { job_id, .. } => *job_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JobEnqueued { .. } => "job_enqueued",
            Self::JobCompleted { .. } => "job_completed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::JobDeadLettered { .. } => "job_dead_lettered",
            Self::LeaseReclaimed { .. } => "lease_reclaimed",
        }
    }
}

impl TenantScoped for QueueEvent {
    fn tenant_id(&self) -> &TenantId {
        match self {
            Self::JobEnqueued { tenant_id, .. }
            | Self::JobCompleted { tenant_id, .. }
            | Self::RetryScheduled { tenant_id, .. }
            | Self::JobDeadLettered { tenant_id, .. }
            | Self::LeaseReclaimed { tenant_id, .. } => tenant_id,
        }
    }
}

/// Receiver of queue events. Any `EventBus<QueueEvent>` qualifies.
pub trait QueueObserver: Send + Sync {
    fn observe(&self, event: QueueEvent);
}

pub type SharedObserver = Arc<dyn QueueObserver>;

impl<B> QueueObserver for B
where
    B: EventBus<QueueEvent>,
{
    fn observe(&self, event: QueueEvent) {
        let name = event.name();
        let job_id = event.job_id();
        if let Err(err) = self.publish(event) {
            tracing::warn!(event = name, job_id = %job_id, error = ?err, "failed to publish queue event");
        }
    }
}

pub(crate) fn emit(observer: Option<&SharedObserver>, event: QueueEvent) {
    if let Some(observer) = observer {
        observer.observe(event);
    }
}

#[cfg(test)]
mod tests {
    use convoy_events::InMemoryEventBus;

    use super::*;

    #[test]
    fn event_bus_is_an_observer() {
        let bus = Arc::new(InMemoryEventBus::<QueueEvent>::new());
        let sub = bus.subscribe();
        let observer: SharedObserver = bus.clone();

        let job_id = JobId::new();
        observer.observe(QueueEvent::JobCompleted {
            job_id,
            tenant_id: TenantId::new("t1"),
            attempt: 0,
        });

        let got = sub.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].job_id(), job_id);
        assert!(got[0].belongs_to(&TenantId::new("t1")));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(QueueEvent::JobDeadLettered {
            job_id: JobId::new(),
            tenant_id: TenantId::new("t1"),
            direction: Direction::Outbound,
            attempt: 4,
            reason: "exhausted".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "job_dead_lettered");
        assert_eq!(json["direction"], "outbound");
    }
}
