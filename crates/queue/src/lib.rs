//! Multi-tenant message dispatch queue.
//!
//! - `job`: the job model and its validation
//! - `store`: the queue store contract, in-memory and Redis backends
//! - `producer`: normalizes collaborator submissions and enqueues them
//! - `worker`: concurrent consumers with leases, timeouts and lease reclamation
//! - `retry`: exponential backoff and dead-lettering
//!
//! Delivery is at-least-once. Handlers must tolerate seeing a job twice.

pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod handler;
pub mod job;
pub mod producer;
pub mod retry;
pub mod store;
pub mod submission;
pub mod worker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, QueueConfig};
pub use delivery::{DeliveryError, DeliveryHandler, DeliveryProvider};
pub use error::QueueError;
pub use events::{QueueEvent, QueueObserver, SharedObserver};
pub use handler::{FnHandler, HandlerRegistry, JobHandler, JobResult, handler_fn};
pub use job::{Direction, Job, JobStatus, Lease, MediaKind, MessageContent, validate};
pub use producer::Producer;
pub use retry::{RetryController, RetryDecision, RetryPolicy};
pub use store::{
    DeadLetterEntry, Enqueued, FailureKind, FailureReason, InMemoryQueueStore, QueueStats,
    QueueStore, ReclaimedLease,
};
#[cfg(feature = "redis")]
pub use store::RedisQueueStore;
pub use submission::{RawContent, RawEvent, SubmitInbound, SubmitOutbound};
pub use worker::{JobOutcome, PoolStats, ProcessedJob, WorkerPool, WorkerPoolBuilder, WorkerPoolHandle};

pub use convoy_core::{JobId, TenantId, WorkerId};
