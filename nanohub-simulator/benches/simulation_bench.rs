#[macro_use]
extern crate criterion;

use std::time::Duration;

use criterion::{black_box, Criterion};
use nanohub_config::HubConfig;
use nanohub_simulator::{run_demo, ChaosConfig};

/// One minute of virtual time with every demo nanoapp loaded.
fn benchmark_demo_minute(c: &mut Criterion) {
    let config = HubConfig::default();
    let seed = 42;

    let mut group = c.benchmark_group("simulation_demo_minute");
    for (label, chaos) in [
        ("calm", ChaosConfig::DISABLED),
        ("chaotic", ChaosConfig::moderate()),
    ] {
        group.bench_function(label, |b| {
            b.iter(|| {
                let sim = run_demo(&config, seed, chaos, Duration::from_secs(60)).unwrap();
                black_box(sim.summary())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_demo_minute);
criterion_main!(benches);
