use criterion::{black_box, Criterion, Throughput};
use std::thread;
use strata::{AllocOptions, Allocator, ArenaAllocator, SystemAllocator};

const OPS: usize = 20_000;

pub fn run(c: &mut Criterion) {
    let mut group = c.benchmark_group("threads");
    group.sample_size(10);

    for t in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements((OPS * t) as u64));

        // Every thread hits the shared system singleton.
        group.bench_function(format!("shared_system_{t}_threads"), |b| {
            b.iter(|| {
                let handles: Vec<_> = (0..t)
                    .map(|_| {
                        thread::spawn(|| {
                            let system = SystemAllocator::global();
                            for i in 0..OPS {
                                let size = 16 + (i % 8) * 8;
                                let ptr = system.alloc(size, 8, AllocOptions::NONE).unwrap();
                                unsafe { system.free(black_box(ptr), size, 8) };
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            })
        });

        // One arena per thread over the shared parent.
        group.bench_function(format!("arena_per_thread_{t}_threads"), |b| {
            b.iter(|| {
                let handles: Vec<_> = (0..t)
                    .map(|_| {
                        thread::spawn(|| {
                            let arena = ArenaAllocator::with_initial_size(SystemAllocator::global(), 64 * 1024).unwrap();
                            for i in 0..OPS {
                                black_box(arena.alloc(16 + (i % 8) * 8, 8, AllocOptions::NONE).unwrap());
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            })
        });
    }
    group.finish();
}
