//! 事件总线与服务注册表性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 过滤表达式解析与匹配基准
//! - 同步发布基准（不同订阅者数量）
//! - 异步发布吞吐基准
//! - 服务查找基准

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use semver::Version;
use std::sync::Arc;
use std::time::Duration;
use tendril_core::{
    AllowAll, Event, EventBus, EventBusConfig, Filter, MemoryFaultSink, ModuleDescriptor,
    ModuleIdentity, Properties, Runtime, RuntimeConfig,
};

fn owner(id: u64) -> ModuleIdentity {
    ModuleIdentity::new(id, format!("bench.{id}"), Version::new(1, 0, 0))
}

fn bus(rt: &tokio::runtime::Runtime, worker_count: usize) -> EventBus {
    let _guard = rt.enter();
    let config = EventBusConfig {
        worker_count,
        ..Default::default()
    };
    EventBus::new(config, Arc::new(AllowAll), Arc::new(MemoryFaultSink::new())).unwrap()
}

// ============================================================================
// 过滤表达式基准测试
// ============================================================================

fn filter_benchmark(c: &mut Criterion) {
    let source = "(&(k=v)(|(level>=3)(name=org*))(!(disabled=true)))";
    let filter = Filter::parse(source).unwrap();
    let event = Event::builder("org/test/X")
        .property("k", "v")
        .property("level", 5)
        .property("name", "org.example")
        .build();

    let mut group = c.benchmark_group("filter");
    group.bench_function("parse", |b| b.iter(|| Filter::parse(black_box(source))));
    group.bench_function("match", |b| b.iter(|| filter.matches_event(black_box(&event))));
    group.finish();
}

// ============================================================================
// 同步发布基准测试
// ============================================================================

fn publish_sync_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_sync");
    for subscribers in [1usize, 10, 100].iter() {
        let bus = bus(&rt, 1);
        for i in 0..*subscribers {
            let filter = if i % 2 == 0 { Some("(k=v)") } else { None };
            bus.subscribe(owner(i as u64 + 1), &["org/test/*"], filter, |event| {
                black_box(event.topic());
                Ok(())
            })
            .unwrap();
        }

        group.throughput(Throughput::Elements(*subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            subscribers,
            |b, _| {
                b.iter(|| {
                    let event = Event::builder("org/test/X").property("k", "v").build();
                    bus.publish_sync(black_box(event)).unwrap()
                });
            },
        );
        rt.block_on(bus.close());
    }
    group.finish();
}

// ============================================================================
// 异步发布基准测试
// ============================================================================

fn publish_async_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = bus(&rt, 4);
    bus.subscribe(owner(1), &["org/test/*"], None, |event| {
        black_box(event.properties().len());
        Ok(())
    })
    .unwrap();

    let mut group = c.benchmark_group("publish_async");
    group.measurement_time(Duration::from_secs(10));
    for batch_size in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    for i in 0..batch_size {
                        let event = Event::builder("org/test/X").property("seq", i as u64).build();
                        bus.publish(event).unwrap();
                    }
                });
            },
        );
    }
    group.finish();

    rt.block_on(bus.close());
}

// ============================================================================
// 服务查找基准测试
// ============================================================================

trait Codec: Send + Sync {
    fn encode(&self, input: &str) -> usize;
}

struct Identity;

impl Codec for Identity {
    fn encode(&self, input: &str) -> usize {
        input.len()
    }
}

fn service_lookup_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let runtime = rt.block_on(async {
        let runtime = Runtime::builder()
            .config(RuntimeConfig::builder().worker_count(1).build())
            .fault_sink(Arc::new(MemoryFaultSink::new()))
            .build()
            .unwrap();
        let id = runtime
            .install(ModuleDescriptor::builder("bench.codecs").build().unwrap())
            .unwrap();
        runtime.start(id).await.unwrap();

        let context = runtime.lifecycle().context_for(&runtime.get_module(id).unwrap());
        for ranking in 0..50 {
            let codec: Arc<dyn Codec> = Arc::new(Identity);
            let mut properties = Properties::new();
            properties.insert("service.ranking".to_string(), ranking.into());
            let format = if ranking % 2 == 0 { "json" } else { "yaml" };
            properties.insert("format".to_string(), format.into());
            context.register_service(codec, properties).unwrap();
        }
        runtime
    });

    let registry = runtime.registry().clone();
    let mut group = c.benchmark_group("service_lookup");
    group.bench_function("best", |b| {
        b.iter(|| registry.get_service::<dyn Codec>().map(|c| c.encode(black_box("payload"))))
    });
    group.bench_function("filtered", |b| {
        b.iter(|| {
            registry
                .get_services_filtered::<dyn Codec>(black_box("(format=json)"))
                .unwrap()
                .len()
        })
    });
    group.finish();

    rt.block_on(runtime.shutdown());
}

criterion_group!(
    benches,
    filter_benchmark,
    publish_sync_benchmark,
    publish_async_benchmark,
    service_lookup_benchmark,
);
criterion_main!(benches);
