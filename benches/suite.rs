use criterion::{criterion_group, criterion_main, Criterion};

mod workloads;

fn bench_main(c: &mut Criterion) {
    workloads::micro::run(c);
    workloads::larson::run(c);
    workloads::threads::run(c);
}

criterion_group!(benches, bench_main);
criterion_main!(benches);
