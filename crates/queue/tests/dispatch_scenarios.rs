//! End-to-end scenarios against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_events::{EventBus, InMemoryEventBus};
use convoy_queue::{
    Clock, DeadLetterEntry, Direction, Enqueued, FailureReason, HandlerRegistry,
    InMemoryQueueStore, Job, JobId, JobOutcome, JobResult, JobStatus, ManualClock, Producer,
    QueueConfig, QueueError, QueueEvent, QueueStats, QueueStore, ReclaimedLease, RetryDecision,
    SubmitInbound, SubmitOutbound, TenantId, WorkerId, WorkerPool, handler_fn,
};

const LEASE: Duration = Duration::from_secs(30);

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryQueueStore>,
    producer: Producer,
    config: QueueConfig,
}

fn harness(config: QueueConfig) -> Harness {
    let clock = ManualClock::starting_now();
    let store = InMemoryQueueStore::arc(clock.clone());
    let producer = Producer::new(store.clone(), clock.clone(), &config);
    Harness {
        clock,
        store,
        producer,
        config,
    }
}

fn hello(tenant: &str, wa_message_id: &str) -> SubmitInbound {
    SubmitInbound {
        tenant_id: tenant.into(),
        from: "+1".into(),
        to: "+2".into(),
        wa_message_id: wa_message_id.into(),
        content: "hi".into(),
    }
}

fn outbound(tenant: &str, to: &str) -> SubmitOutbound {
    SubmitOutbound {
        tenant_id: tenant.into(),
        to: to.into(),
        from: Some("+2".into()),
        content: "your order shipped".into(),
    }
}

#[test]
fn inbound_lifecycle_and_idempotent_resubmission() {
    let h = harness(QueueConfig::default());
    let t1 = TenantId::new("t1");
    let w = WorkerId::new("w1");

    let id = h.producer.submit_inbound(hello("t1", "m1")).unwrap();
    let job = h.store.get(&t1, id).unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
    assert_eq!(h.store.stats(&t1).unwrap().total(), 1);

    let claimed = h.store.claim("inbound", &w, LEASE).unwrap().unwrap();
    assert_eq!(claimed.id(), id);
    assert_eq!(claimed.status(), JobStatus::InFlight);

    h.store.ack(id, &w).unwrap();
    assert_eq!(
        h.store.get(&t1, id).unwrap().unwrap().status(),
        JobStatus::Completed
    );

    let again = h.producer.submit_inbound(hello("t1", "m1")).unwrap();
    assert_eq!(again, id);
    assert_eq!(h.store.stats(&t1).unwrap().total(), 1);
    assert_eq!(h.store.depth("inbound").unwrap(), 0);
}

#[tokio::test]
async fn outbound_exhausts_retries_and_dead_letters() {
    let config = QueueConfig::default()
        .with_max_attempts(5)
        .with_backoff(Duration::from_millis(10), Duration::from_secs(1))
        .with_handler_timeout(Duration::from_millis(200));
    let h = harness(config.clone());

    let bus = Arc::new(InMemoryEventBus::<QueueEvent>::new());
    let events = bus.subscribe();

    let mut handlers = HandlerRegistry::new();
    handlers.register_default(
        Direction::Outbound,
        handler_fn(|_| async { JobResult::retryable("provider 503") }),
    );
    let pool = WorkerPool::builder(h.store.clone())
        .config(config)
        .clock(h.clock.clone())
        .handlers(handlers)
        .observer(bus.clone())
        .build()
        .unwrap();

    let id = h.producer.submit_outbound(outbound("t1", "+15550001")).unwrap();
    let w = WorkerId::new("w1");
    let mut attempts = Vec::new();

    for _ in 0..5 {
        // Move past any backoff.
        h.clock.advance(Duration::from_secs(2));
        let processed = pool.process_next("outbound", &w).await.unwrap().unwrap();
        assert_eq!(processed.job_id, id);
        attempts.push(processed.outcome);
    }

    assert!(matches!(attempts[3], JobOutcome::RetryScheduled { attempt: 4, .. }));
    assert!(matches!(attempts[4], JobOutcome::DeadLettered { .. }));

    let t1 = TenantId::new("t1");
    let job = h.store.get(&t1, id).unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::DeadLettered);
    assert_eq!(job.attempt(), 4);

    // Never re-enters Pending.
    h.clock.advance(Duration::from_secs(3600));
    assert!(pool.process_next("outbound", &w).await.unwrap().is_none());

    let dead = h.store.list_dead_letters(&t1, 10).unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("provider 503"));

    let dead_letter_events: Vec<_> = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, QueueEvent::JobDeadLettered { .. }))
        .collect();
    assert_eq!(dead_letter_events.len(), 1);
    assert_eq!(pool.stats().retried, 4);
    assert_eq!(pool.stats().dead_lettered, 1);
}

#[test]
fn two_tenants_alternate_under_backlog() {
    let h = harness(QueueConfig::default());
    for n in 0..100 {
        h.producer
            .submit_inbound(hello("alpha", &format!("a-{n}")))
            .unwrap();
    }
    for n in 0..100 {
        h.producer
            .submit_inbound(hello("beta", &format!("b-{n}")))
            .unwrap();
    }

    let w = WorkerId::new("w");
    let mut served = Vec::new();
    while let Some(job) = h.store.claim("inbound", &w, LEASE).unwrap() {
        served.push(job.tenant_id().clone());
        h.store.ack(job.id(), &w).unwrap();
    }

    assert_eq!(served.len(), 200);
    // Beta's first claim comes no later than the second overall claim.
    assert_eq!(served[1], TenantId::new("beta"));
    for pair in served.windows(2) {
        assert_ne!(pair[0], pair[1], "same tenant served twice in a row");
    }
}

#[test]
fn fifo_within_a_tenant() {
    let h = harness(QueueConfig::default());
    let ids: Vec<_> = (0..5)
        .map(|n| h.producer.submit_inbound(hello("t1", &format!("m{n}"))).unwrap())
        .collect();

    let w = WorkerId::new("w");
    let claimed: Vec<_> = std::iter::from_fn(|| h.store.claim("inbound", &w, LEASE).unwrap())
        .map(|job| job.id())
        .collect();
    assert_eq!(claimed, ids);
}

#[test]
fn crashed_worker_lease_is_recovered() {
    let h = harness(QueueConfig::default());
    let id = h.producer.submit_inbound(hello("t1", "m1")).unwrap();

    let crashed = WorkerId::new("crashed");
    h.store.claim("inbound", &crashed, LEASE).unwrap().unwrap();

    let rescuer = WorkerId::new("rescuer");
    assert!(h.store.claim("inbound", &rescuer, LEASE).unwrap().is_none());

    h.clock.advance(LEASE);
    let reclaimed = h.store.reclaim_expired_leases("inbound").unwrap();
    assert_eq!(reclaimed.len(), 1);

    let job = h.store.claim("inbound", &rescuer, LEASE).unwrap().unwrap();
    assert_eq!(job.id(), id);
    assert_eq!(job.attempt(), 0);

    // The crashed worker's late ack loses.
    assert_eq!(h.store.ack(id, &crashed), Err(QueueError::NotInFlight(id)));
    h.store.ack(id, &rescuer).unwrap();
}

#[test]
fn claim_never_returns_future_jobs() {
    let h = harness(QueueConfig::default());
    let w = WorkerId::new("w");
    let id = h.producer.submit_inbound(hello("t1", "m1")).unwrap();
    h.store.claim("inbound", &w, LEASE).unwrap();
    let later = h.clock.now() + chrono::Duration::seconds(30);
    let retry = RetryDecision::Retry {
        attempt: 1,
        available_at: later,
    };
    h.store
        .fail(id, &w, &FailureReason::retryable("busy"), &retry)
        .unwrap();

    for _ in 0..29 {
        assert!(h.store.claim("inbound", &w, LEASE).unwrap().is_none());
        h.clock.advance(Duration::from_secs(1));
    }
    h.clock.advance(Duration::from_secs(1));
    let job = h.store.claim("inbound", &w, LEASE).unwrap().unwrap();
    assert!(job.available_at() <= h.clock.now());
    assert_eq!(job.attempt(), 1);
}

#[test]
fn dead_lettered_key_allows_fresh_submission() {
    let h = harness(QueueConfig::default());
    let w = WorkerId::new("w");
    let first = h.producer.submit_inbound(hello("t1", "m1")).unwrap();
    h.store.claim("inbound", &w, LEASE).unwrap();
    let dead = RetryDecision::DeadLetter {
        reason: "unparseable".into(),
    };
    h.store
        .fail(first, &w, &FailureReason::permanent("unparseable"), &dead)
        .unwrap();

    let second = h.producer.submit_inbound(hello("t1", "m1")).unwrap();
    assert_ne!(first, second);
}

#[test]
fn tenants_cannot_read_each_other() {
    let h = harness(QueueConfig::default());
    let id = h.producer.submit_inbound(hello("t1", "m1")).unwrap();

    assert_eq!(
        h.store.get(&TenantId::new("t2"), id),
        Err(QueueError::TenantIsolation)
    );
    assert_eq!(
        h.store.replay_dead_letter(&TenantId::new("t2"), id),
        Err(QueueError::TenantIsolation)
    );
    assert_eq!(h.config.inbound_queue, "inbound");
}

#[test]
fn json_submission_round_trip() {
    let h = harness(QueueConfig::default());
    let payload = serde_json::json!({
        "direction": "outbound",
        "tenantId": "t1",
        "to": "+15550001",
        "content": {"type": "location", "latitude": 52.52, "longitude": 13.40}
    });
    let id = h.producer.submit_json(&payload).unwrap();
    assert_eq!(h.store.depth("outbound").unwrap(), 1);

    let bad = serde_json::json!({"direction": "inbound", "tenantId": "t1"});
    assert!(matches!(
        h.producer.submit_json(&bad),
        Err(QueueError::InvalidJob(_))
    ));
    assert!(h.store.get(&TenantId::new("t1"), id).unwrap().is_some());
}

/// Delegates to the in-memory store, optionally reporting an outage on the
/// first `fail` call (before anything is written) or stalling the calling
/// thread on every `claim`.
struct FaultyStore {
    inner: Arc<InMemoryQueueStore>,
    fail_outage_pending: AtomicBool,
    claim_stall: Duration,
}

impl FaultyStore {
    fn new(inner: Arc<InMemoryQueueStore>) -> Self {
        Self {
            inner,
            fail_outage_pending: AtomicBool::new(false),
            claim_stall: Duration::ZERO,
        }
    }

    fn with_fail_outage(self) -> Self {
        self.fail_outage_pending.store(true, Ordering::SeqCst);
        self
    }

    fn with_claim_stall(mut self, stall: Duration) -> Self {
        self.claim_stall = stall;
        self
    }
}

impl QueueStore for FaultyStore {
    fn enqueue(&self, queue: &str, job: Job, at: DateTime<Utc>) -> Result<Enqueued, QueueError> {
        self.inner.enqueue(queue, job, at)
    }

    fn claim(
        &self,
        queue: &str,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<Job>, QueueError> {
        if !self.claim_stall.is_zero() {
            std::thread::sleep(self.claim_stall);
        }
        self.inner.claim(queue, worker, lease)
    }

    fn ack(&self, job_id: JobId, worker: &WorkerId) -> Result<(), QueueError> {
        self.inner.ack(job_id, worker)
    }

    fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        reason: &FailureReason,
        next: &RetryDecision,
    ) -> Result<Job, QueueError> {
        if self.fail_outage_pending.swap(false, Ordering::SeqCst) {
            return Err(QueueError::unavailable("connection reset"));
        }
        self.inner.fail(job_id, worker, reason, next)
    }

    fn reclaim_expired_leases(&self, queue: &str) -> Result<Vec<ReclaimedLease>, QueueError> {
        self.inner.reclaim_expired_leases(queue)
    }

    fn get(&self, tenant: &TenantId, job_id: JobId) -> Result<Option<Job>, QueueError> {
        self.inner.get(tenant, job_id)
    }

    fn list_dead_letters(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>, QueueError> {
        self.inner.list_dead_letters(tenant, limit)
    }

    fn replay_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<JobId, QueueError> {
        self.inner.replay_dead_letter(tenant, job_id)
    }

    fn delete_dead_letter(&self, tenant: &TenantId, job_id: JobId) -> Result<(), QueueError> {
        self.inner.delete_dead_letter(tenant, job_id)
    }

    fn stats(&self, tenant: &TenantId) -> Result<QueueStats, QueueError> {
        self.inner.stats(tenant)
    }

    fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        self.inner.depth(queue)
    }

    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        self.inner.purge_completed(older_than)
    }
}

#[tokio::test]
async fn store_outage_while_recording_failure_leaves_job_recoverable() {
    let config = QueueConfig::default()
        .with_backoff(Duration::ZERO, Duration::ZERO)
        .with_lease_duration(Duration::from_secs(30));
    let h = harness(config.clone());
    let store = Arc::new(FaultyStore::new(h.store.clone()).with_fail_outage());

    let mut handlers = HandlerRegistry::new();
    handlers.register_default(
        Direction::Inbound,
        handler_fn(|_| async { JobResult::retryable("upstream 503") }),
    );
    let pool = WorkerPool::builder(store)
        .config(config)
        .clock(h.clock.clone())
        .handlers(handlers)
        .build()
        .unwrap();

    let t1 = TenantId::new("t1");
    let w = WorkerId::new("w");
    let id = h.producer.submit_inbound(hello("t1", "m1")).unwrap();

    let err = pool.process_next("inbound", &w).await.unwrap_err();
    assert!(err.is_transient());

    // Nothing was recorded: the job keeps its lease and never rests in Failed.
    let job = h.store.get(&t1, id).unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::InFlight);
    assert_eq!(job.attempt(), 0);
    assert_eq!(h.store.stats(&t1).unwrap().failed, 0);

    // Resubmission still dedups to the live job.
    assert_eq!(h.producer.submit_inbound(hello("t1", "m1")).unwrap(), id);

    h.clock.advance(LEASE + Duration::from_secs(1));
    assert_eq!(pool.reclaim("inbound").await.unwrap(), 1);

    let processed = pool.process_next("inbound", &w).await.unwrap().unwrap();
    assert_eq!(processed.job_id, id);
    assert!(matches!(
        processed.outcome,
        JobOutcome::RetryScheduled { attempt: 1, .. }
    ));
    assert_eq!(h.store.get(&t1, id).unwrap().unwrap().status(), JobStatus::Pending);
}

#[tokio::test]
async fn slow_store_calls_do_not_stall_the_runtime() {
    let h = harness(QueueConfig::default());
    let store = Arc::new(FaultyStore::new(h.store.clone()).with_claim_stall(Duration::from_millis(200)));

    let mut handlers = HandlerRegistry::new();
    handlers.register_default(Direction::Inbound, handler_fn(|_| async { JobResult::Success }));
    let pool = WorkerPool::builder(store)
        .config(h.config.clone())
        .clock(h.clock.clone())
        .handlers(handlers)
        .build()
        .unwrap();
    let id = h.producer.submit_inbound(hello("t1", "m1")).unwrap();

    // Single-threaded runtime: the ticker only advances if the claim runs
    // off this thread.
    let ticks = Arc::new(AtomicU32::new(0));
    let counter = ticks.clone();
    let ticker = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let processed = pool
        .process_next("inbound", &WorkerId::new("w"))
        .await
        .unwrap()
        .unwrap();
    ticker.abort();

    assert_eq!(processed.job_id, id);
    assert_eq!(processed.outcome, JobOutcome::Completed);
    assert!(ticks.load(Ordering::SeqCst) >= 5);
}
