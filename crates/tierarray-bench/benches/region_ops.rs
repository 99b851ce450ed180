//! Criterion micro-benchmarks for host-tier construction, fill and assignment.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tierarray_bench::{emulated, ramp, SIZES};
use tierarray_region::{ArrayRegion, HbwPolicy, HighBandwidth, NodeMask, Pinned, Standard};

fn bench_construct(c: &mut Criterion) {
    let mut group = c.benchmark_group("construct");
    for &len in &SIZES {
        group.throughput(Throughput::Bytes((len * 4) as u64));
        group.bench_with_input(BenchmarkId::new("standard", len), &len, |b, &len| {
            b.iter(|| ArrayRegion::<f32, _>::new(black_box(len), Standard::default()).unwrap());
        });
        let hbw = HighBandwidth::new(Default::default(), HbwPolicy::Preferred, NodeMask::default());
        group.bench_with_input(BenchmarkId::new("high_bandwidth", len), &len, |b, &len| {
            b.iter(|| ArrayRegion::<f32, _>::new(black_box(len), hbw.clone()).unwrap());
        });
        let pinned = Pinned::new(emulated(1));
        group.bench_with_input(BenchmarkId::new("pinned", len), &len, |b, &len| {
            b.iter(|| ArrayRegion::<f32, _>::new(black_box(len), pinned.clone()).unwrap());
        });
    }
    group.finish();
}

fn bench_from_slice(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_slice");
    for &len in &SIZES {
        let source = ramp(len / 2);
        group.throughput(Throughput::Bytes((len * 4) as u64));
        group.bench_with_input(BenchmarkId::new("pad_half", len), &len, |b, &len| {
            b.iter(|| {
                ArrayRegion::<f32, _>::from_slice(black_box(&source), len, Standard::default())
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_copy_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_assign");
    for &len in &SIZES {
        let src = ArrayRegion::<f32, _>::from_slice(&ramp(len), len, Standard::default()).unwrap();
        let mut dst = ArrayRegion::<f32, _>::new(len, Standard::default()).unwrap();
        group.throughput(Throughput::Bytes((len * 4) as u64));
        group.bench_function(BenchmarkId::new("host_to_host", len), |b| {
            b.iter(|| dst.copy_assign(black_box(&src)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_construct, bench_from_slice, bench_copy_assign);
criterion_main!(benches);
