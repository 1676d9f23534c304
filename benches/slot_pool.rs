// Slot pool and slot list benchmarks.
//
// Measures the filled-slot acquire path, fill-after-recycle, and the
// add/remove pair the timeout tracker performs per operation.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use recyclable_pool::{CircularSlotList, Lifecycle, PoolConfiguration, SlotListTuning, SlotPool};

fn pool(capacity: usize) -> SlotPool<u64> {
    SlotPool::new(
        PoolConfiguration::new(capacity).with_name("bench"),
        Lifecycle::new(|| Some(0), |_| Ok(())),
    )
    .expect("failed to create pool")
}

fn acquire_filled(c: &mut Criterion) {
    let pool = pool(64);
    for index in 0..64 {
        pool.acquire(index);
    }

    let mut index = 0usize;
    c.bench_function("acquire_filled_slot", |b| {
        b.iter(|| {
            index = (index + 1) % 64;
            black_box(pool.acquire(index))
        });
    });
}

fn fill_after_recycle(c: &mut Criterion) {
    let pool = pool(16);

    c.bench_function("recycle_then_fill_16", |b| {
        b.iter(|| {
            pool.recycle_all();
            for index in 0..16 {
                black_box(pool.acquire(index));
            }
        });
    });
}

fn slot_list_add_remove(c: &mut Criterion) {
    let list = CircularSlotList::new(Arc::new(SlotListTuning::new(256, 1 << 16)));
    let token = Arc::new(7u64);

    c.bench_function("slot_list_add_remove", |b| {
        b.iter(|| {
            let index = list.add(Arc::clone(&token)).expect("slot list full");
            black_box(list.remove(index))
        });
    });
}

fn contended_acquire(c: &mut Criterion) {
    let pool = Arc::new(pool(4));

    c.bench_function("contended_acquire_4_threads", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                for worker in 0..4 {
                    let pool = &pool;
                    scope.spawn(move || {
                        for i in 0..256usize {
                            black_box(pool.acquire((i + worker) % 4));
                        }
                    });
                }
            });
        });
    });
}

criterion_group!(
    benches,
    acquire_filled,
    fill_after_recycle,
    slot_list_add_remove,
    contended_acquire
);
criterion_main!(benches);
