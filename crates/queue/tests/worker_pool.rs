use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use convoy_events::{EventBus, InMemoryEventBus};
use convoy_queue::{
    Direction, HandlerRegistry, InMemoryQueueStore, JobResult, JobStatus, Producer, QueueConfig,
    QueueEvent, QueueStore, SubmitInbound, SubmitOutbound, SystemClock, TenantId, WorkerPool,
    handler_fn,
};

fn fast_config() -> QueueConfig {
    QueueConfig::default()
        .with_worker_concurrency(4)
        .with_poll_interval(Duration::from_millis(5))
        .with_reclaim_interval(Duration::from_millis(20))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
        .with_lease_duration(Duration::from_secs(2))
        .with_handler_timeout(Duration::from_millis(500))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_drains_a_backlog_across_tenants() {
    let clock = Arc::new(SystemClock);
    let store = InMemoryQueueStore::arc(clock.clone());
    let config = fast_config();
    let producer = Producer::new(store.clone(), clock.clone(), &config);

    let seen = Arc::new(AtomicUsize::new(0));
    let mut handlers = HandlerRegistry::new();
    let counter = seen.clone();
    handlers.register_default(
        Direction::Inbound,
        handler_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                JobResult::Success
            }
        }),
    );

    for tenant in ["acme", "globex", "initech"] {
        for n in 0..20 {
            producer
                .submit_inbound(SubmitInbound {
                    tenant_id: tenant.into(),
                    from: "+1".into(),
                    to: "+2".into(),
                    wa_message_id: format!("{tenant}-{n}"),
                    content: "hi".into(),
                })
                .unwrap();
        }
    }

    let pool = WorkerPool::builder(store.clone())
        .config(config)
        .clock(clock)
        .handlers(handlers)
        .build()
        .unwrap();
    let handle = pool.spawn("inbound");

    wait_until(|| handle.stats().succeeded == 60).await;
    handle.drain().await;

    assert_eq!(seen.load(Ordering::SeqCst), 60);
    assert_eq!(store.depth("inbound").unwrap(), 0);
    for tenant in ["acme", "globex", "initech"] {
        let stats = store.stats(&TenantId::new(tenant)).unwrap();
        assert_eq!(stats.completed, 20);
        assert_eq!(stats.in_flight, 0);
    }
    assert_eq!(pool.stats().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flaky_delivery_eventually_succeeds() {
    let clock = Arc::new(SystemClock);
    let store = InMemoryQueueStore::arc(clock.clone());
    let config = fast_config();
    let bus = Arc::new(InMemoryEventBus::<QueueEvent>::new());
    let events = bus.subscribe();
    let producer =
        Producer::new(store.clone(), clock.clone(), &config).with_observer(bus.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let mut handlers = HandlerRegistry::new();
    let counter = calls.clone();
    handlers.register_default(
        Direction::Outbound,
        handler_fn(move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    JobResult::retryable("rate limited")
                } else {
                    JobResult::Success
                }
            }
        }),
    );

    let id = producer
        .submit_outbound(SubmitOutbound {
            tenant_id: "t1".into(),
            to: "+15550001".into(),
            from: None,
            content: "ping".into(),
        })
        .unwrap();

    let pool = WorkerPool::builder(store.clone())
        .config(config)
        .clock(clock)
        .handlers(handlers)
        .observer(bus)
        .build()
        .unwrap();
    let handle = pool.spawn("outbound");

    wait_until(|| handle.stats().succeeded == 1).await;
    handle.drain().await;

    let job = store.get(&TenantId::new("t1"), id).unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.attempt(), 2);

    let names: Vec<_> = events.drain().iter().map(QueueEvent::name).collect();
    assert_eq!(
        names,
        [
            "job_enqueued",
            "retry_scheduled",
            "retry_scheduled",
            "job_completed"
        ]
    );
}

#[tokio::test]
async fn drain_returns_promptly_when_idle() {
    let store = InMemoryQueueStore::arc(Arc::new(SystemClock));
    let pool = WorkerPool::builder(store)
        .config(QueueConfig::default().with_poll_interval(Duration::from_secs(60)))
        .build()
        .unwrap();
    let handle = pool.spawn("inbound");
    assert_eq!(handle.queue(), "inbound");

    tokio::time::timeout(Duration::from_secs(5), handle.drain())
        .await
        .expect("idle pool should stop without waiting for its poll interval");
}
