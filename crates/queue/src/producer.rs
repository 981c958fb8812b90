//! Producer: validates submissions and enqueues them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use convoy_core::JobId;
use tracing::{debug, error};

use crate::clock::SharedClock;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{self, QueueEvent, SharedObserver};
use crate::job::{Direction, Job};
use crate::store::{Enqueued, QueueStore};
use crate::submission::{RawEvent, SubmitInbound, SubmitOutbound};

/// Entry point for collaborators. Inbound jobs go to the inbound queue,
/// outbound jobs to the outbound queue.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn QueueStore>,
    clock: SharedClock,
    inbound_queue: String,
    outbound_queue: String,
    observer: Option<SharedObserver>,
}

impl Producer {
    pub fn new(store: Arc<dyn QueueStore>, clock: SharedClock, config: &QueueConfig) -> Self {
        Self {
            store,
            clock,
            inbound_queue: config.inbound_queue.clone(),
            outbound_queue: config.outbound_queue.clone(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn queue_for(&self, direction: Direction) -> &str {
        match direction {
            Direction::Inbound => &self.inbound_queue,
            Direction::Outbound => &self.outbound_queue,
        }
    }

    /// Normalize, validate and enqueue. Re-submitting an inbound message
    /// that is already queued returns the existing id.
    pub fn submit(&self, event: RawEvent) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        self.submit_at(event, now)
    }

    /// Like [`submit`](Self::submit), but the job is not claimable before
    /// `available_at`.
    pub fn submit_at(
        &self,
        event: RawEvent,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, QueueError> {
        let job = event.into_job(self.clock.now())?;
        self.enqueue(job, available_at)
    }

    pub fn submit_inbound(&self, submission: SubmitInbound) -> Result<JobId, QueueError> {
        self.submit(RawEvent::Inbound(submission))
    }

    pub fn submit_outbound(&self, submission: SubmitOutbound) -> Result<JobId, QueueError> {
        self.submit(RawEvent::Outbound(submission))
    }

    /// Submit an untyped collaborator payload.
    pub fn submit_json(&self, payload: &serde_json::Value) -> Result<JobId, QueueError> {
        self.submit(RawEvent::from_json(payload)?)
    }

    fn enqueue(&self, job: Job, available_at: DateTime<Utc>) -> Result<JobId, QueueError> {
        let queue = self.queue_for(job.direction()).to_string();
        let job_id = job.id();
        let tenant_id = job.tenant_id().clone();
        let direction = job.direction();

        let enqueued = self
            .store
            .enqueue(&queue, job, available_at)
            .inspect_err(|err| {
                error!(job_id = %job_id, tenant_id = %tenant_id, queue = %queue, error = %err, "enqueue failed");
            })?;

        match enqueued {
            Enqueued::Created(id) => {
                debug!(job_id = %id, tenant_id = %tenant_id, queue = %queue, "job enqueued");
                events::emit(
                    self.observer.as_ref(),
                    QueueEvent::JobEnqueued {
                        job_id: id,
                        tenant_id,
                        direction,
                        queue,
                        available_at,
                    },
                );
                Ok(id)
            }
            Enqueued::Existing(id) => {
                debug!(job_id = %id, tenant_id = %tenant_id, "duplicate submission ignored");
                Ok(id)
            }
        }
    }
}

impl core::fmt::Debug for Producer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer")
            .field("inbound_queue", &self.inbound_queue)
            .field("outbound_queue", &self.outbound_queue)
            .finish_non_exhaustive()
    }
}
