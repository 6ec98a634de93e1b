// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! Benchmarks for descriptor-ring construction over a heap-backed arena.
//!
//! Ring linking runs on every channel start; this measures how it scales
//! with the descriptor count.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::ptr::NonNull;
use uaxidma::{DescriptorRing, SgDescriptor};

fn bench_link(c: &mut Criterion) {
    let counts: Vec<usize> = vec![1, 4, 16, 64, 256, 1024];

    let mut group = c.benchmark_group("ring_link");

    for count in counts {
        let mut backing: Vec<SgDescriptor> = (0..count).map(|_| SgDescriptor::new()).collect();
        let base = NonNull::new(backing.as_mut_ptr()).unwrap().cast::<u8>();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("link", count), &count, |b, &count| {
            let mut ring = unsafe { DescriptorRing::from_raw(base, count) };
            b.iter(|| {
                ring.link(0x1e00_0000, 256 << 10);
            });
        });
    }

    group.finish();
}

fn bench_prime(c: &mut Criterion) {
    let count = 256usize;
    let mut backing: Vec<SgDescriptor> = (0..count).map(|_| SgDescriptor::new()).collect();
    let base = NonNull::new(backing.as_mut_ptr()).unwrap().cast::<u8>();

    c.bench_function("ring_prime_transmit", |b| {
        let mut ring = unsafe { DescriptorRing::from_raw(base, count) };
        ring.link(0x1e00_0000, 4096);
        b.iter(|| {
            ring.prime_transmit();
        });
    });
}

criterion_group!(benches, bench_link, bench_prime);
criterion_main!(benches);
