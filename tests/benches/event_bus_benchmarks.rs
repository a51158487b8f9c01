//! # Conles Event Bus Benchmarks
//!
//! ```bash
//! cargo bench --package ioc-tests --bench event_bus_benchmarks
//! cargo bench --package ioc-tests --bench event_bus_benchmarks -- conles/post_async
//! ```
//!
//! | Group | Measures |
//! |-------|----------|
//! | `conles/post_async` | queue a full batch, then drain it |
//! | `conles/post_sync` | inline delivery to N subscribers |
//! | `conles/subscribe` | register and remove one subscriber |
//! | `conet/memory_send` | one `SendData` over the in-process transport |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ioc_core::{
    ConetConfig, ConlesConfig, ConlesEventBus, EventDesc, EventFilter, EventId, IocConfig,
    LinkLifecycleManager, LinkRequest, MemoryTransport, PostOptions, SubscribeArgs, SubscriberId,
    TransportAdapter,
};
use rand::Rng;

fn bus_with(max_subscribers: usize, queue_depth: usize) -> ConlesEventBus {
    let config = IocConfig {
        conles: ConlesConfig {
            max_subscribers,
            queue_depth,
            ..ConlesConfig::default()
        },
        ..IocConfig::default()
    };
    ConlesEventBus::from_config(&config)
}

fn counting_subscribers(bus: &ConlesEventBus, n: u64) -> Arc<AtomicU64> {
    let seen = Arc::new(AtomicU64::new(0));
    for id in 0..n {
        let seen = Arc::clone(&seen);
        let consumer = Arc::new(move |e: &EventDesc| {
            seen.fetch_add(e.value, Ordering::Relaxed);
        });
        bus.subscribe(SubscribeArgs::new(SubscriberId(id), consumer))
            .expect("subscribe");
    }
    seen
}

fn bench_post_async(c: &mut Criterion) {
    let mut group = c.benchmark_group("conles/post_async");
    for depth in [16usize, 64, 256] {
        let bus = bus_with(4, depth);
        let seen = counting_subscribers(&bus, 2);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("batch", depth), &depth, |b, &depth| {
            b.iter(|| {
                for i in 0..depth as u64 {
                    bus.post(
                        EventDesc::new(EventId(1)).with_value(i),
                        PostOptions::async_nonblock(),
                    )
                    .expect("post");
                }
                black_box(bus.force_process())
            })
        });
        black_box(seen.load(Ordering::Relaxed));
    }
    group.finish();
}

fn bench_post_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("conles/post_sync");
    for subscribers in [1u64, 4, 16] {
        let bus = bus_with(16, 64);
        let seen = counting_subscribers(&bus, subscribers);
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    bus.post(
                        EventDesc::new(EventId(2)).with_value(1),
                        PostOptions::sync_blocking(),
                    )
                    .expect("post")
                })
            },
        );
        black_box(seen.load(Ordering::Relaxed));
    }
    group.finish();
}

fn bench_subscribe_cycle(c: &mut Criterion) {
    let bus = bus_with(16, 64);
    counting_subscribers(&bus, 8);
    let mut rng = rand::thread_rng();

    c.bench_function("conles/subscribe/cycle", |b| {
        b.iter(|| {
            let id = SubscriberId(1_000 + rng.gen_range(0..1_000));
            let filter = EventFilter::ids([EventId(rng.gen_range(0..8))]);
            let consumer = Arc::new(|_: &EventDesc| {});
            bus.subscribe(SubscribeArgs::new(id, consumer).with_filter(filter))
                .expect("subscribe");
            bus.unsubscribe(id).expect("unsubscribe");
        })
    });
}

fn bench_memory_send(c: &mut Criterion) {
    let transport = MemoryTransport::new();
    let links = LinkLifecycleManager::new(transport.clone(), ConetConfig::default());
    let service = links.online_service("fifo://bench").expect("online");
    let client = transport.connect("fifo://bench").expect("connect");
    let link = links
        .accept_with_timeout(service, Duration::from_secs(1))
        .expect("accept");
    let payload = vec![0xabu8; 256];

    let mut group = c.benchmark_group("conet/memory_send");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("256b", |b| {
        b.iter(|| {
            links
                .execute_on_link(link, LinkRequest::SendData(payload.clone()))
                .expect("send");
            black_box(client.read_available().expect("drain"))
        })
    });
    group.finish();
}

criterion_group!(
    name = event_bus_benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_post_async,
        bench_post_sync,
        bench_subscribe_cycle,
        bench_memory_send,
);

criterion_main!(event_bus_benches);
