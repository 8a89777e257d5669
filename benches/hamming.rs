use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use phsearch::hamming::{count_within, hamming};
use phsearch::phash::Fingerprint;
use phsearch::search::scan;
use phsearch::Record;
use rand::prelude::*;

fn bench_hamming(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming");
    let mut rng = rand::rng();
    let src: u64 = rng.random();
    let dst: Vec<u64> = (0..1 << 20).map(|_| rng.random()).collect();

    group.throughput(Throughput::Elements(dst.len() as u64));
    group.bench_function("hamming_u64", |b| {
        b.iter(|| dst.iter().map(|&d| hamming(src, d)).sum::<u32>());
    });

    let fingerprints: Vec<_> = dst.iter().map(|&d| Fingerprint::from_bits(d)).collect();
    let query = Fingerprint::from_bits(src);
    group.bench_function("count_within", |b| {
        b.iter(|| count_within(&query, &fingerprints, black_box(7)));
    });
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("Scan");
    let mut rng = rand::rng();
    let records: Vec<_> = (0..1000)
        .map(|i| Record::new(format!("{i}.jpg"), Some(Fingerprint::from_bits(rng.random()))))
        .collect();
    let query = Fingerprint::from_bits(rng.random());

    // 对应一页记录的扫描开销
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("page_1000", |b| {
        b.iter(|| scan(records.iter().cloned(), &query, black_box(7)));
    });
    group.finish();
}

criterion_group!(benches, bench_hamming, bench_scan);
criterion_main!(benches);
