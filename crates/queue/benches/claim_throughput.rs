use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use convoy_queue::{
    InMemoryQueueStore, Job, MessageContent, QueueStore, SystemClock, TenantId, WorkerId,
};

const LEASE: Duration = Duration::from_secs(30);

fn filled_store(tenants: usize, per_tenant: usize) -> InMemoryQueueStore {
    let store = InMemoryQueueStore::new(Arc::new(SystemClock));
    let now = chrono::Utc::now();
    for n in 0..per_tenant {
        for t in 0..tenants {
            let job = Job::outbound(
                TenantId::new(format!("tenant-{t}")),
                format!("+1555{n:07}"),
                None,
                MessageContent::text("bench"),
                now,
            );
            store.enqueue("outbound", job, now).unwrap();
        }
    }
    store
}

/// Enqueue cost as the number of tenants sharing a queue grows.
fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    group.throughput(Throughput::Elements(1));

    for tenants in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(tenants), &tenants, |b, &tenants| {
            let store = filled_store(tenants, 10);
            let now = chrono::Utc::now();
            let mut n = 0usize;
            b.iter(|| {
                n += 1;
                let job = Job::outbound(
                    TenantId::new(format!("tenant-{}", n % tenants)),
                    "+15550000",
                    None,
                    MessageContent::text("bench"),
                    now,
                );
                black_box(store.enqueue("outbound", job, now).unwrap());
            });
        });
    }
    group.finish();
}

/// Claim + ack round trip against a fair-share backlog.
fn bench_claim_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_ack");

    for tenants in [1usize, 10, 100] {
        let batch = tenants * 50;
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tenants), &tenants, |b, &tenants| {
            let worker = WorkerId::new("bench");
            b.iter_batched(
                || filled_store(tenants, 50),
                |store| {
                    while let Some(job) = store.claim("outbound", &worker, LEASE).unwrap() {
                        store.ack(job.id(), &worker).unwrap();
                    }
                    black_box(store)
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_claim_ack);
criterion_main!(benches);
