#[macro_use]
extern crate criterion;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, Criterion};

use nanohub_config::{HubConfig, TimerConfig};
use nanohub_core::events::{Event, EventLoop};
use nanohub_core::nanoapp::{NanoappHandler, NanoappPermissions};
use nanohub_core::runtime::{NanoappApi, Runtime};
use nanohub_core::time::{ExpiryCallback, MonotonicClock, SystemTimer, TimerLimits, TimerPool};
use nanohub_core::types::{event_type, Cookie, InstanceId};

struct Sink;

impl NanoappHandler for Sink {
    fn start(&mut self, _api: &mut NanoappApi<'_>) -> bool {
        true
    }

    fn handle_event(&mut self, _: &mut NanoappApi<'_>, _: InstanceId, _: u16, data: &dyn Any) {
        black_box(data);
    }
}

/// Hardware timer that is never armed; the bench drives expiry by hand.
struct Disarmed;

impl SystemTimer for Disarmed {
    fn set(&self, _delay: Duration, _on_expiry: ExpiryCallback) {}
    fn cancel(&self) {}
    fn is_active(&self) -> bool {
        false
    }
}

fn bench_post_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_loop_throughput");

    for batch in [16usize, 64, 512] {
        group.throughput(criterion::Throughput::Elements(batch as u64));
        group.bench_function(format!("batch_{}", batch), |b| {
            let mut config = HubConfig::default();
            config.event_loop.queue_capacity = batch * 2;
            config.telemetry.metrics_enabled = false;
            let mut runtime = Runtime::builder(&config)
                .system_timer(Arc::new(Disarmed))
                .build()
                .unwrap();
            let target = runtime
                .load_nanoapp(0x1, NanoappPermissions::empty(), Box::new(Sink))
                .unwrap();
            runtime.run_until_idle();
            let poster = runtime.poster();

            b.iter(|| {
                for value in 0..batch as u32 {
                    poster.post_event(Event::targeted(event_type::FIRST_USER_VALUE, value, target));
                }
                black_box(runtime.run_until_idle());
            });
        });
    }
    group.finish();
}

fn bench_timer_set_fire(c: &mut Criterion) {
    c.bench_function("timer_pool_set_fire_16", |b| {
        let mut event_loop = EventLoop::new(256);
        let pool = TimerPool::new(
            TimerLimits::from(&TimerConfig::default()),
            Arc::new(MonotonicClock::new()),
            Arc::new(Disarmed),
            event_loop.poster(),
        );
        let owner = InstanceId(1);

        b.iter(|| {
            for cookie in 0..16u64 {
                pool.set_nanoapp_timer(owner, Duration::ZERO, Cookie(cookie), true);
            }
            black_box(pool.handle_expired_timers_and_schedule_next());
            event_loop.discard_queued_events(|_| true);
        });
    });
}

criterion_group!(benches, bench_post_dispatch, bench_timer_set_fire);
criterion_main!(benches);
