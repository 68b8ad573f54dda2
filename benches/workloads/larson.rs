use criterion::{black_box, Criterion, Throughput};
use std::ptr::NonNull;
use strata::{AllocOptions, Allocator, PoolAllocator, ScopedAllocator, SystemAllocator};

const OPS: usize = 50_000;
const SLOTS: usize = 1000;
const MIN_SIZE: usize = 16;
const MAX_SIZE: usize = 128;

struct XorShift64 {
    a: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { a: if seed == 0 { 1 } else { seed } }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.a;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.a = x;
        x
    }

    fn gen_range(&mut self, min: usize, max: usize) -> usize {
        (self.next() as usize % (max - min)) + min
    }
}

/// Replaces random slots with fresh allocations of random size.
fn churn(allocator: &dyn Allocator) {
    let mut rng = XorShift64::new(0xdead_beef);
    let mut slots: Vec<Option<(NonNull<u8>, usize)>> = vec![None; SLOTS];

    for _ in 0..OPS {
        let idx = rng.gen_range(0, SLOTS);
        let size = rng.gen_range(MIN_SIZE, MAX_SIZE);
        if let Some((ptr, old)) = slots[idx].take() {
            unsafe { allocator.free(ptr, old, 8) };
        }
        let ptr = allocator.alloc(size, 8, AllocOptions::NONE).unwrap();
        slots[idx] = Some((black_box(ptr), size));
    }
    for (ptr, size) in slots.into_iter().flatten() {
        unsafe { allocator.free(ptr, size, 8) };
    }
}

pub fn run(c: &mut Criterion) {
    let mut group = c.benchmark_group("larson");
    group.throughput(Throughput::Elements(OPS as u64));
    group.sample_size(10);

    let system = SystemAllocator::default();
    group.bench_function("larson_system", |b| b.iter(|| churn(&system)));

    let pool = PoolAllocator::with_chunks(&system, MAX_SIZE, 8, SLOTS).unwrap();
    group.bench_function("larson_pool", |b| b.iter(|| churn(&pool)));

    let scope = ScopedAllocator::new(&system);
    group.bench_function("larson_scope", |b| b.iter(|| churn(&scope)));

    group.finish();
}
