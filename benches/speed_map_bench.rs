//! Speed map micro-benchmark.
//!
//! `map_speed` sits on the spindle command path and is also reachable from
//! the realtime duty refresh; it must stay allocation-free and cheap.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use spindle_atc::spindle::speed_map::{SpeedEntry, SpeedMap};

fn calibrated_map() -> SpeedMap {
    let mut map = SpeedMap::from_entries(&[
        SpeedEntry {
            speed: 0,
            percent: 0.0,
        },
        SpeedEntry {
            speed: 3000,
            percent: 18.0,
        },
        SpeedEntry {
            speed: 8000,
            percent: 44.0,
        },
        SpeedEntry {
            speed: 16_000,
            percent: 78.0,
        },
        SpeedEntry {
            speed: 24_000,
            percent: 100.0,
        },
    ]);
    map.finalize(8192).unwrap();
    map
}

fn bench_map_speed(c: &mut Criterion) {
    let map = calibrated_map();

    c.bench_function("map_speed_interpolated", |b| {
        b.iter(|| map.map_speed(black_box(11_750)))
    });

    c.bench_function("map_speed_clamped", |b| {
        b.iter(|| map.map_speed(black_box(30_000)))
    });

    c.bench_function("map_speed_sweep", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for speed in (0..25_000u32).step_by(97) {
                acc += u64::from(map.map_speed(black_box(speed)));
            }
            acc
        })
    });
}

criterion_group!(benches, bench_map_speed);
criterion_main!(benches);
