//! Benchmarks for job polling and mapping queries against the simulator

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use storage_array_client::{
    AccessMode, Credentials, InitiatorType, JobMode, Outcome, ProvisionKind, Session,
    SimulatorBackend, SimulatorConfig,
};
use tokio::runtime::Runtime;

fn session(rt: &Runtime, mode: JobMode) -> Session {
    let backend = Arc::new(SimulatorBackend::new(SimulatorConfig {
        job_mode: mode,
        job_duration_ms: 60_000,
        ..Default::default()
    }));
    rt.block_on(Session::connect_backend(
        "sim://bench@localhost",
        Credentials::default(),
        30_000,
        backend,
    ))
    .unwrap()
}

fn bench_poll_job(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_tracker");
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let mut session = session(&rt, JobMode::Deferred);
    let job = rt.block_on(async {
        let pool = session.list_pools().await.unwrap().remove(0);
        match session
            .create_volume(&pool, "bench", 1 << 30, ProvisionKind::Thin)
            .await
            .unwrap()
        {
            Outcome::Started(job) => job,
            Outcome::Done(_) => panic!("expected a job"),
        }
    });

    group.bench_function("poll_running_job", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = session.poll_job(black_box(&job)).await;
            });
        });
    });

    group.finish();
}

fn bench_create_delete_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_tracker");
    group.throughput(Throughput::Elements(2));

    let rt = Runtime::new().unwrap();
    let mut session = session(&rt, JobMode::Immediate);
    let pool = rt.block_on(session.list_pools()).unwrap().remove(0);

    group.bench_function("create_delete_inline", |b| {
        b.iter(|| {
            rt.block_on(async {
                if let Ok(Outcome::Done(volume)) = session
                    .create_volume(&pool, black_box("cycle"), 1 << 20, ProvisionKind::Default)
                    .await
                {
                    let _ = session.delete_volume(&volume).await;
                }
            });
        });
    });

    group.finish();
}

fn bench_mapping_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("access_mapping");
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let mut session = session(&rt, JobMode::Immediate);

    // 100 volumes, each granted to one of 10 initiators
    let (initiator, volume) = rt.block_on(async {
        let pool = session.list_pools().await.unwrap().remove(0);
        let mut initiators = Vec::new();
        for i in 0..10 {
            let initiator = session
                .create_initiator(
                    &format!("host-{}", i),
                    &format!("iqn.2001-04.com.example:host{}", i),
                    InitiatorType::Iscsi,
                )
                .await
                .unwrap();
            initiators.push(initiator);
        }
        let mut volumes = Vec::new();
        for v in 0..100 {
            let volume = match session
                .create_volume(&pool, &format!("vol-{:03}", v), 1 << 20, ProvisionKind::Thin)
                .await
                .unwrap()
            {
                Outcome::Done(volume) => volume,
                Outcome::Started(_) => panic!("expected an inline volume"),
            };
            session
                .grant_access(&initiators[v % 10], &volume, AccessMode::ReadWrite)
                .await
                .unwrap();
            volumes.push(volume);
        }
        (initiators.remove(0), volumes.remove(0))
    });

    group.bench_function("volumes_accessible_by", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = session.volumes_accessible_by(black_box(&initiator)).await;
            });
        });
    });

    group.bench_function("initiators_granted_to", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = session.initiators_granted_to(black_box(&volume)).await;
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_poll_job,
    bench_create_delete_cycle,
    bench_mapping_queries,
);

criterion_main!(benches);
