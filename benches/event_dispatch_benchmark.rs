use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use trading_core::core::{sync_handler, EventBus, EventBusConfig};
use trading_core::{Event, EventPayload, EventType, Price, TickData, Volume};

fn tick_event(index: u64) -> Event {
    Event::new(
        EventPayload::Tick(TickData {
            symbol: "BTCUSDT".into(),
            last_price: Price::from_str("50000.25").unwrap(),
            bid_price: Price::from_str("50000.00").unwrap(),
            ask_price: Price::from_str("50000.50").unwrap(),
            volume: Volume::new(rust_decimal::Decimal::from(index % 100)),
            timestamp: chrono::Utc::now(),
        }),
        "bench",
    )
}

fn bench_publish_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_1000_ticks_one_handler", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let bus = EventBus::new(EventBusConfig::default()).unwrap();
                let delivered = Arc::new(AtomicU64::new(0));
                let counter = delivered.clone();
                bus.register(
                    EventType::Tick,
                    "sink",
                    sync_handler(move |event| {
                        black_box(&event.payload);
                        counter.fetch_add(1, Ordering::Relaxed);
                    }),
                )
                .await;
                bus.start().await;

                for i in 0..1000u64 {
                    bus.publish(tick_event(i));
                }
                while delivered.load(Ordering::Relaxed) < 1000 {
                    tokio::task::yield_now().await;
                }
                bus.stop().await;
            })
        })
    });
}

fn bench_event_serialization(c: &mut Criterion) {
    let event = tick_event(42);
    let line = serde_json::to_string(&event).unwrap();

    c.bench_function("serialize_tick_event", |b| {
        b.iter(|| serde_json::to_string(black_box(&event)).unwrap())
    });
    c.bench_function("deserialize_tick_event", |b| {
        b.iter(|| serde_json::from_str::<Event>(black_box(&line)).unwrap())
    });
}

criterion_group!(benches, bench_publish_dispatch, bench_event_serialization);
criterion_main!(benches);
