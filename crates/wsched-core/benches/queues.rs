use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use wsched_core::{ChaseLevQueue, MpmcRing, SmallFn, SpmcRing};

const OPS_PER_ITER: u64 = 10_000;

// ============================================================================
// Owner push/pop (uncontended)
// ============================================================================

fn bench_owner_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("owner/push_pop");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    group.bench_function("chase_lev", |b| {
        let q = ChaseLevQueue::with_capacity(OPS_PER_ITER as usize);
        b.iter(|| unsafe {
            for i in 0..OPS_PER_ITER {
                let _ = q.push_front(black_box(i));
            }
            while let Some(v) = q.pop_front() {
                black_box(v);
            }
        })
    });

    group.bench_function("spmc_ring", |b| {
        let q = SpmcRing::new(OPS_PER_ITER as usize);
        b.iter(|| unsafe {
            for i in 0..OPS_PER_ITER {
                let _ = q.push_back(black_box(i));
            }
            while let Some(v) = q.pop_back() {
                black_box(v);
            }
        })
    });

    group.finish();
}

// ============================================================================
// Owner push with concurrent thieves
// ============================================================================

fn bench_steal_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("steal/contended");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    for thieves in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("chase_lev", thieves), &thieves, |b, &n| {
            let q = Arc::new(ChaseLevQueue::with_capacity(64));
            let stop = Arc::new(AtomicBool::new(false));
            let handles: Vec<_> = (0..n)
                .map(|_| {
                    let q = q.clone();
                    let stop = stop.clone();
                    thread::spawn(move || {
                        while !stop.load(Ordering::Relaxed) {
                            black_box(q.steal());
                        }
                    })
                })
                .collect();

            b.iter(|| unsafe {
                for i in 0..OPS_PER_ITER {
                    let _ = q.push_front(i);
                    if i & 1 == 0 {
                        black_box(q.pop_front());
                    }
                }
            });

            stop.store(true, Ordering::Relaxed);
            for h in handles {
                let _ = h.join();
            }
        });
    }

    group.finish();
}

// ============================================================================
// Mailbox
// ============================================================================

fn bench_mailbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    group.bench_function("push_pop_u64", |b| {
        let ring = MpmcRing::new(1024);
        b.iter(|| {
            for i in 0..OPS_PER_ITER {
                let _ = ring.push(black_box(i));
                black_box(ring.pop());
            }
        })
    });

    group.bench_function("push_pop_small_fn", |b| {
        let ring: MpmcRing<SmallFn<()>> = MpmcRing::new(1024);
        b.iter(|| {
            for i in 0..OPS_PER_ITER {
                let _ = ring.push(SmallFn::new(move |_: &()| {
                    black_box(i);
                }));
                if let Some(f) = ring.pop() {
                    f.call(&());
                }
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_owner_push_pop, bench_steal_contention, bench_mailbox);
criterion_main!(benches);
