use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use erased_rc::{AtomicCount, MutexCount, Shared, Unique};
use std::sync::Arc;
use std::time::Duration;

trait Area {
    fn area(&self) -> u64;
}

struct Rect {
    w: u64,
    h: u64,
}

impl Area for Rect {
    fn area(&self) -> u64 {
        self.w * self.h
    }
}

fn bench_clone_drop(c: &mut Criterion) {
    c.bench_function("shared_atomic_clone_drop", |b| {
        let s: Shared<u64, AtomicCount> = Shared::new(1);
        b.iter(|| {
            let x = s.clone();
            black_box(&x);
            drop(x);
        })
    });
    c.bench_function("shared_mutex_clone_drop", |b| {
        let s: Shared<u64, MutexCount> = Shared::new(1);
        b.iter(|| {
            let x = s.clone();
            black_box(&x);
            drop(x);
        })
    });
    // Baseline for comparison.
    c.bench_function("std_arc_clone_drop", |b| {
        let s = Arc::new(1u64);
        b.iter(|| {
            let x = s.clone();
            black_box(&x);
            drop(x);
        })
    });
}

fn bench_construct(c: &mut Criterion) {
    c.bench_function("shared_construct_drop", |b| {
        b.iter_batched(
            || Box::new(Rect { w: 3, h: 4 }),
            |r| {
                let s: Shared<Rect> = Shared::from_box(r);
                black_box(s)
            },
            BatchSize::SmallInput,
        )
    });
    c.bench_function("unique_construct_drop", |b| {
        b.iter_batched(
            || Box::new(Rect { w: 3, h: 4 }),
            |r| black_box(Unique::from_box(r)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_view_deref(c: &mut Criterion) {
    c.bench_function("shared_dyn_view_deref", |b| {
        let s: Shared<Rect> = Shared::new(Rect { w: 3, h: 4 });
        let v: Shared<dyn Area> = s.view(|r| r as &dyn Area);
        b.iter(|| black_box(v.area()))
    });
}

fn bench_contended(c: &mut Criterion) {
    c.bench_function("shared_atomic_clone_drop_4_threads", |b| {
        let s: Shared<u64> = Shared::new(1);
        b.iter(|| {
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        for _ in 0..1_000 {
                            black_box(s.clone());
                        }
                    });
                }
            })
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_clone_drop, bench_construct, bench_view_deref, bench_contended
}
criterion_main!(benches);
