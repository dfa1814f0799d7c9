//! Benchmarks for the full `RelayCore::publish` pipeline: Maildir write,
//! SQLite insert, and in-process subscriber dispatch.

use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dorkos_relay::{DispatchMode, PublishOptions, RelayConfig, RelayCore};
use tokio::runtime::Runtime;

fn bench_publish_no_subscribers(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let core = rt.block_on(async { RelayCore::open(RelayConfig::under_state_root(dir.path())).await.unwrap() });

    c.bench_function("publish/no_subscribers", |b| {
        b.to_async(&rt).iter(|| {
            let core = core.clone();
            async move {
                core.publish(
                    black_box("relay.bench.no_subs"),
                    Bytes::from_static(b"payload"),
                    PublishOptions::default(),
                )
                .await
                .unwrap();
            }
        })
    });
}

fn bench_publish_with_matching_subscriber(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let core = rt.block_on(async {
        let core = RelayCore::open(RelayConfig::under_state_root(dir.path())).await.unwrap();
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        core.subscribe("relay.bench.*", DispatchMode::FireAndForget, move |_env| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            })
        })
        .unwrap();
        core
    });

    c.bench_function("publish/one_matching_subscriber", |b| {
        b.to_async(&rt).iter(|| {
            let core = core.clone();
            async move {
                core.publish(
                    black_box("relay.bench.with_sub"),
                    Bytes::from_static(b"payload"),
                    PublishOptions::default(),
                )
                .await
                .unwrap();
            }
        })
    });
}

fn bench_publish_ephemeral(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let core = rt.block_on(async { RelayCore::open(RelayConfig::under_state_root(dir.path())).await.unwrap() });

    c.bench_function("publish_ephemeral/no_storage", |b| {
        b.to_async(&rt).iter(|| {
            let core = core.clone();
            async move {
                core.publish_ephemeral(black_box("relay.bench.signal"), Bytes::new())
                    .await
                    .unwrap();
            }
        })
    });
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_publish_with_matching_subscriber,
    bench_publish_ephemeral
);
criterion_main!(benches);
