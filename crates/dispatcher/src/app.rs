//! Running dispatcher: one worker pool per queue, a dead-letter alert
//! thread and a periodic purge of completed jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use convoy_events::{EventBus, InMemoryEventBus, Subscription};
use convoy_queue::{
    InMemoryQueueStore, Producer, QueueEvent, QueueStore, SharedClock, SharedObserver,
    WorkerPool, WorkerPoolHandle, clock,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handlers::default_handlers;
use crate::settings::{Settings, StoreBackend};

const PURGE_EVERY: Duration = Duration::from_secs(60);
const ALERT_POLL: Duration = Duration::from_millis(250);

/// Build the configured store. Redis is pinged before it is returned.
pub fn build_store(settings: &Settings, clock: SharedClock) -> anyhow::Result<Arc<dyn QueueStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(InMemoryQueueStore::arc(clock)),
        StoreBackend::Redis => redis_store(settings, clock),
    }
}

#[cfg(feature = "redis")]
fn redis_store(settings: &Settings, clock: SharedClock) -> anyhow::Result<Arc<dyn QueueStore>> {
    let url = settings
        .redis_url
        .as_deref()
        .context("REDIS_URL is not set")?;
    let store = convoy_queue::RedisQueueStore::new(url, clock)?;
    store.ping().context("redis is unreachable")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
fn redis_store(_settings: &Settings, _clock: SharedClock) -> anyhow::Result<Arc<dyn QueueStore>> {
    anyhow::bail!("CONVOY_STORE=redis but this binary was built without the `redis` feature")
}

pub struct Dispatcher {
    producer: Producer,
    store: Arc<dyn QueueStore>,
    pools: Vec<WorkerPoolHandle>,
    shutdown: watch::Sender<bool>,
    purge: Option<JoinHandle<()>>,
    alerts_stop: Arc<AtomicBool>,
    alerts: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    /// Start pools on the inbound and outbound queues. Must be called from
    /// within a tokio runtime.
    pub fn start(settings: Settings) -> anyhow::Result<Self> {
        let clock = clock::system_clock();
        let store = build_store(&settings, clock.clone())?;
        Self::start_with(settings, store, clock)
    }

    pub fn start_with(
        settings: Settings,
        store: Arc<dyn QueueStore>,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let bus = Arc::new(InMemoryEventBus::<QueueEvent>::new());
        let observer: SharedObserver = bus.clone();

        let alerts_stop = Arc::new(AtomicBool::new(false));
        let alerts = spawn_dead_letter_alerts(bus.subscribe(), alerts_stop.clone())
            .context("failed to start dead-letter alert thread")?;

        let pool = WorkerPool::builder(store.clone())
            .config(settings.queue.clone())
            .clock(clock.clone())
            .handlers(default_handlers())
            .observer(observer.clone())
            .build()?;

        let pools = vec![
            pool.spawn(settings.queue.inbound_queue.clone()),
            pool.spawn(settings.queue.outbound_queue.clone()),
        ];

        let (shutdown, shutdown_rx) = watch::channel(false);
        let purge = settings.completed_retention.map(|retention| {
            tokio::spawn(purge_loop(store.clone(), clock.clone(), retention, shutdown_rx))
        });

        let producer = Producer::new(store.clone(), clock, &settings.queue).with_observer(observer);

        Ok(Self {
            producer,
            store,
            pools,
            shutdown,
            purge,
            alerts_stop,
            alerts: Some(alerts),
        })
    }

    /// Submission entry point for collaborators embedding the dispatcher.
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Drain every pool, then stop the background tasks.
    pub async fn shutdown(mut self) {
        for pool in self.pools.drain(..) {
            pool.drain().await;
        }

        let _ = self.shutdown.send(true);
        if let Some(purge) = self.purge.take() {
            if let Err(err) = purge.await {
                error!(error = %err, "purge task failed");
            }
        }

        self.alerts_stop.store(true, Ordering::Relaxed);
        if let Some(alerts) = self.alerts.take() {
            let joined = tokio::task::spawn_blocking(move || alerts.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("dead-letter alert thread panicked");
            }
        }
        info!("dispatcher stopped");
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("producer", &self.producer)
            .field("pools", &self.pools)
            .finish_non_exhaustive()
    }
}

/// Surface dead letters on their own thread so a slow sink never stalls a
/// worker.
fn spawn_dead_letter_alerts(
    sub: Subscription<QueueEvent>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("convoy-dead-letters".into())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match sub.recv_timeout(ALERT_POLL) {
                    Ok(QueueEvent::JobDeadLettered {
                        job_id,
                        tenant_id,
                        direction,
                        attempt,
                        reason,
                    }) => {
                        warn!(
                            job_id = %job_id,
                            tenant_id = %tenant_id,
                            direction = %direction,
                            attempt,
                            reason = %reason,
                            "dead letter requires attention"
                        );
                    }
                    Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
}

async fn purge_loop(
    store: Arc<dyn QueueStore>,
    clock: SharedClock,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(PURGE_EVERY) => {}
        }

        let Ok(retention) = chrono::Duration::from_std(retention) else {
            warn!("completed-job retention out of range; purge disabled");
            break;
        };
        let cutoff = clock.now() - retention;
        let purging = store.clone();
        match tokio::task::spawn_blocking(move || purging.purge_completed(cutoff)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => debug!(purged = n, cutoff = %cutoff, "completed jobs purged"),
            Ok(Err(err)) => error!(error = %err, "purge of completed jobs failed"),
            Err(err) => error!(error = %err, "purge task failed"),
        }
    }
}
