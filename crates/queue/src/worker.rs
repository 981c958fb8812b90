//! Worker pool: concurrent consumers of one queue.
//!
//! Each worker loops on `claim`, runs the resolved handler on its own task
//! under a timeout, and reports the outcome back to the store. A reaper task
//! per queue returns expired leases to the pending set. Handler failures,
//! timeouts and panics never take a worker down.
//!
//! Store calls go through `spawn_blocking`, since backends talk to their
//! storage synchronously.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_core::{JobId, TenantId, WorkerId};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clock::{self, SharedClock};
use crate::config::{ConfigError, QueueConfig};
use crate::error::QueueError;
use crate::events::{self, QueueEvent, SharedObserver};
use crate::handler::{HandlerRegistry, JobResult};
use crate::job::Job;
use crate::retry::{RetryController, RetryDecision, RetryPolicy};
use crate::store::QueueStore;

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    RetryScheduled {
        attempt: u32,
        available_at: DateTime<Utc>,
    },
    DeadLettered {
        reason: String,
    },
    /// The lease expired or was reclaimed before the outcome was recorded.
    LeaseLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub outcome: JobOutcome,
}

static POOL_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
struct PoolCounters {
    claimed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    lease_lost: AtomicU64,
    in_flight: AtomicUsize,
}

impl PoolCounters {
    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.succeeded,
            JobOutcome::RetryScheduled { .. } => &self.retried,
            JobOutcome::DeadLettered { .. } => &self.dead_lettered,
            JobOutcome::LeaseLost => &self.lease_lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            claimed: self.claimed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            lease_lost: self.lease_lost.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub lease_lost: u64,
    pub in_flight: usize,
}

/// Builder for [`WorkerPool`].
pub struct WorkerPoolBuilder {
    store: Arc<dyn QueueStore>,
    handlers: HandlerRegistry,
    config: QueueConfig,
    clock: SharedClock,
    observer: Option<SharedObserver>,
}

impl WorkerPoolBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<WorkerPool, ConfigError> {
        self.config.validate()?;

        let mut retry =
            RetryController::new(RetryPolicy::from_config(&self.config), self.clock.clone());
        if let Some(observer) = &self.observer {
            retry = retry.with_observer(observer.clone());
        }

        Ok(WorkerPool {
            inner: Arc::new(PoolInner {
                store: self.store,
                handlers: self.handlers,
                retry,
                config: self.config,
                observer: self.observer,
                counters: PoolCounters::default(),
            }),
        })
    }
}

struct PoolInner {
    store: Arc<dyn QueueStore>,
    handlers: HandlerRegistry,
    retry: RetryController,
    config: QueueConfig,
    observer: Option<SharedObserver>,
    counters: PoolCounters,
}

impl PoolInner {
    fn settle(
        &self,
        job: &Job,
        worker: &WorkerId,
        result: JobResult,
    ) -> Result<JobOutcome, QueueError> {
        let Some(failure) = result.into_failure() else {
            return match self.store.ack(job.id(), worker) {
                Ok(()) => {
                    debug!(job_id = %job.id(), tenant_id = %job.tenant_id(), "job completed");
                    events::emit(
                        self.observer.as_ref(),
                        QueueEvent::JobCompleted {
                            job_id: job.id(),
                            tenant_id: job.tenant_id().clone(),
                            attempt: job.attempt(),
                        },
                    );
                    Ok(JobOutcome::Completed)
                }
                Err(QueueError::NotInFlight(id)) => Ok(lease_lost(id, worker)),
                Err(err) => Err(err),
            };
        };

        let decision = match self
            .retry
            .handle_failure(self.store.as_ref(), job, worker, &failure)
        {
            Ok(decision) => decision,
            Err(QueueError::NotInFlight(id)) => return Ok(lease_lost(id, worker)),
            Err(err) => return Err(err),
        };
        Ok(match decision {
            RetryDecision::Retry {
                attempt,
                available_at,
            } => JobOutcome::RetryScheduled {
                attempt,
                available_at,
            },
            RetryDecision::DeadLetter { reason } => JobOutcome::DeadLettered { reason },
        })
    }
}

/// Claims and processes jobs. Cheap to clone; clones share counters.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn builder(store: Arc<dyn QueueStore>) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            store,
            handlers: HandlerRegistry::new(),
            config: QueueConfig::default(),
            clock: clock::system_clock(),
            observer: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }

    /// Claim and fully process at most one job from `queue`.
    ///
    /// Returns `Ok(None)` when nothing is eligible. Store errors are returned;
    /// handler failures are not errors.
    pub async fn process_next(
        &self,
        queue: &str,
        worker: &WorkerId,
    ) -> Result<Option<ProcessedJob>, QueueError> {
        let inner = &self.inner;
        let store = inner.store.clone();
        let (owned_queue, owned_worker) = (queue.to_string(), worker.clone());
        let lease = inner.config.lease_duration;
        let Some(job) =
            blocking(move || store.claim(&owned_queue, &owned_worker, lease)).await?
        else {
            return Ok(None);
        };

        inner.counters.claimed.fetch_add(1, Ordering::Relaxed);
        inner.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        debug!(
            job_id = %job.id(),
            tenant_id = %job.tenant_id(),
            queue = %queue,
            worker = %worker,
            attempt = job.attempt(),
            "claimed job"
        );

        let result = self.run_handler(&job).await;
        let settled = self.settle(&job, worker, result).await;
        inner.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        let outcome = settled?;
        inner.counters.record(&outcome);
        Ok(Some(ProcessedJob {
            job_id: job.id(),
            tenant_id: job.tenant_id().clone(),
            outcome,
        }))
    }

    /// Return expired leases in `queue` to the pending set.
    pub async fn reclaim(&self, queue: &str) -> Result<usize, QueueError> {
        let store = self.inner.store.clone();
        let owned_queue = queue.to_string();
        let reclaimed = blocking(move || store.reclaim_expired_leases(&owned_queue)).await?;
        for lease in &reclaimed {
            warn!(
                job_id = %lease.job_id,
                tenant_id = %lease.tenant_id,
                worker = %lease.worker_id,
                queue = %queue,
                "lease expired, job reclaimed"
            );
            events::emit(
                self.inner.observer.as_ref(),
                QueueEvent::LeaseReclaimed {
                    job_id: lease.job_id,
                    tenant_id: lease.tenant_id.clone(),
                    queue: queue.to_string(),
                    worker_id: lease.worker_id.clone(),
                },
            );
        }
        Ok(reclaimed.len())
    }

    async fn run_handler(&self, job: &Job) -> JobResult {
        let Some(handler) = self.inner.handlers.resolve(job.tenant_id(), job.direction()) else {
            return JobResult::permanent(format!(
                "no handler registered for {}/{}",
                job.tenant_id(),
                job.direction()
            ));
        };

        let timeout = self.inner.config.handler_timeout;
        let owned = job.clone();
        let mut task = tokio::spawn(async move { handler.handle(&owned).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!(job_id = %job.id(), tenant_id = %job.tenant_id(), "handler panicked");
                JobResult::retryable("handler panicked")
            }
            Ok(Err(join_err)) => JobResult::retryable(format!("handler task failed: {join_err}")),
            Err(_) => {
                task.abort();
                warn!(
                    job_id = %job.id(),
                    tenant_id = %job.tenant_id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "handler timed out"
                );
                JobResult::retryable(format!("handler timed out after {timeout:?}"))
            }
        }
    }

    async fn settle(
        &self,
        job: &Job,
        worker: &WorkerId,
        result: JobResult,
    ) -> Result<JobOutcome, QueueError> {
        let inner = self.inner.clone();
        let (job, worker) = (job.clone(), worker.clone());
        blocking(move || inner.settle(&job, &worker, result)).await
    }

    /// Start `worker_concurrency` workers and a lease reaper on `queue`.
    pub fn spawn(&self, queue: impl Into<String>) -> WorkerPoolHandle {
        let queue = queue.into();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let pool_seq = POOL_SEQ.fetch_add(1, Ordering::Relaxed);
        for n in 0..self.inner.config.worker_concurrency {
            let worker = WorkerId::new(format!("{}-{queue}-{pool_seq}-{n}", std::process::id()));
            tasks.spawn(worker_loop(
                self.clone(),
                queue.clone(),
                worker,
                shutdown_rx.clone(),
            ));
        }
        tasks.spawn(reaper_loop(self.clone(), queue.clone(), shutdown_rx));

        info!(
            queue = %queue,
            workers = self.inner.config.worker_concurrency,
            "worker pool started"
        );

        WorkerPoolHandle {
            queue,
            pool: self.clone(),
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.handlers)
            .finish_non_exhaustive()
    }
}

/// Store calls are synchronous and may block on I/O; keep them off the
/// runtime's worker threads.
async fn blocking<T, F>(call: F) -> Result<T, QueueError>
where
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| QueueError::unavailable(format!("store call failed: {err}")))?
}

fn lease_lost(job_id: JobId, worker: &WorkerId) -> JobOutcome {
    warn!(job_id = %job_id, worker = %worker, "lease lost before outcome was recorded");
    JobOutcome::LeaseLost
}

/// Handle to a running pool on one queue.
pub struct WorkerPoolHandle {
    queue: String,
    pool: WorkerPool,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl WorkerPoolHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop claiming and wait for in-flight jobs to finish or time out.
    pub async fn drain(mut self) {
        info!(queue = %self.queue, "draining worker pool");
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(queue = %self.queue, error = %err, "worker task failed");
            }
        }
        info!(queue = %self.queue, stats = ?self.pool.stats(), "worker pool drained");
    }
}

impl core::fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field("queue", &self.queue)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

async fn worker_loop(
    pool: WorkerPool,
    queue: String,
    worker: WorkerId,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(queue = %queue, worker = %worker, "worker started");
    let poll = pool.inner.config.poll_interval;

    while !*shutdown.borrow() {
        match pool.process_next(&queue, &worker).await {
            Ok(Some(processed)) => {
                debug!(
                    job_id = %processed.job_id,
                    tenant_id = %processed.tenant_id,
                    outcome = ?processed.outcome,
                    "job processed"
                );
            }
            Ok(None) => {
                if wait_or_shutdown(&mut shutdown, poll).await {
                    break;
                }
            }
            Err(err) => {
                error!(
                    queue = %queue,
                    worker = %worker,
                    transient = err.is_transient(),
                    error = %err,
                    "queue store error"
                );
                if wait_or_shutdown(&mut shutdown, poll).await {
                    break;
                }
            }
        }
    }

    debug!(queue = %queue, worker = %worker, "worker stopped");
}

async fn reaper_loop(pool: WorkerPool, queue: String, mut shutdown: watch::Receiver<bool>) {
    let interval = pool.inner.config.reclaim_interval;

    loop {
        if wait_or_shutdown(&mut shutdown, interval).await {
            break;
        }
        match pool.reclaim(&queue).await {
            Ok(0) => {}
            Ok(n) => info!(queue = %queue, reclaimed = n, "expired leases reclaimed"),
            Err(err) => error!(queue = %queue, error = %err, "lease reclaim failed"),
        }
    }
}

/// Sleep for `delay` unless shutdown is signalled first. Returns `true` when
/// the caller should stop.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    let changed = tokio::select! {
        res = shutdown.changed() => Some(res.is_ok()),
        _ = tokio::time::sleep(delay) => None,
    };
    match changed {
        None => false,
        Some(true) => *shutdown.borrow(),
        Some(false) => true,
    }
}
