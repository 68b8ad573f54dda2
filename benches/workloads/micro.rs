use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use strata::{AllocOptions, Allocator, ArenaAllocator, PoolAllocator, RegionAllocator, ScopedAllocator, SystemAllocator};

const BATCH: usize = 1000;

pub fn run(c: &mut Criterion) {
    bench_alloc_free(c);
    bench_bump_batch(c);
    bench_bulk_release(c);
}

fn alloc_free(allocator: &dyn Allocator, size: usize) {
    let ptr = allocator.alloc(black_box(size), 8, AllocOptions::NONE).unwrap();
    unsafe { allocator.free(black_box(ptr), size, 8) };
}

fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro_alloc_free");
    group.warm_up_time(std::time::Duration::from_millis(500));
    group.measurement_time(std::time::Duration::from_secs(1));

    let system = SystemAllocator::default();
    for size in [16usize, 256] {
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &size| {
            b.iter(|| alloc_free(&system, size));
        });

        let pool = PoolAllocator::with_chunks(&system, size, 8, 256).unwrap();
        group.bench_with_input(BenchmarkId::new("pool", size), &size, |b, &size| {
            b.iter(|| alloc_free(&pool, size));
        });

        let scope = ScopedAllocator::new(&system);
        group.bench_with_input(BenchmarkId::new("scope", size), &size, |b, &size| {
            b.iter(|| alloc_free(&scope, size));
        });
    }

    group.finish();
}

fn bench_bump_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro_bump_batch");
    group.throughput(Throughput::Elements(BATCH as u64));

    let system = SystemAllocator::default();
    let mut arena = ArenaAllocator::with_initial_size(&system, 64 * 1024).unwrap();
    group.bench_function("arena_1000x32b_reset", |b| {
        b.iter(|| {
            for _ in 0..BATCH {
                black_box(arena.alloc(32, 8, AllocOptions::NONE).unwrap());
            }
            arena.reset();
        })
    });

    let regions = RegionAllocator::with_region_size(&system, 64 * 1024, true).unwrap();
    group.bench_function("region_1000x32b_end", |b| {
        b.iter(|| {
            regions.with_region(|r| {
                for _ in 0..BATCH {
                    black_box(r.alloc(32, 8, AllocOptions::NONE).unwrap());
                }
            })
        })
    });

    group.finish();
}

fn bench_bulk_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro_bulk_release");
    group.throughput(Throughput::Elements(BATCH as u64));

    let system = SystemAllocator::default();
    let scope = ScopedAllocator::new(&system);
    group.bench_function("scope_1000x64b_free_all", |b| {
        b.iter(|| {
            for _ in 0..BATCH {
                black_box(scope.alloc(64, 8, AllocOptions::NONE).unwrap());
            }
            scope.free_all_allocations();
        })
    });

    group.finish();
}
