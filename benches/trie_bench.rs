// benches/trie_bench.rs
// Criterion benchmarks for cptrie:
//  - build + freeze cost for property-table-shaped inputs
//  - frozen lookup throughput (ASCII / BMP / mixed-plane access patterns)
//  - run enumeration over a frozen trie
//
// Run with `cargo bench --bench trie_bench`.

use cptrie::{CodePointTrie, CodePointTrieBuilder, ValueWidth};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;

/// Random short ranges the way real property tables look: mostly BMP,
/// clustered, with a sprinkle of supplementary assignments.
fn property_table_builder(seed: u64, ranges: usize) -> CodePointTrieBuilder {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = CodePointTrie::builder(0, u32::MAX);
    for _ in 0..ranges {
        let start = if rng.random_bool(0.8) {
            rng.random_range(0u32..0xFF00)
        } else {
            rng.random_range(0x10000u32..0x10FE00)
        };
        let len = rng.random_range(1u32..0x200);
        let value = rng.random_range(1u32..0x100);
        builder
            .set_range(start, (start + len).min(0x10FFFF), value, true)
            .unwrap();
    }
    builder
}

fn bench_build_freeze(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_freeze");
    for &ranges in &[64usize, 512, 4096] {
        group.throughput(Throughput::Elements(ranges as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ranges), &ranges, |bench, &ranges| {
            bench.iter(|| {
                let builder = property_table_builder(42, ranges);
                black_box(builder.freeze(ValueWidth::Bits16).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let trie = property_table_builder(7, 2048)
        .freeze(ValueWidth::Bits16)
        .unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let ascii: Vec<u8> = (0..4096).map(|_| rng.random_range(0u8..0x80)).collect();
    let bmp: Vec<u32> = (0..4096).map(|_| rng.random_range(0u32..0x10000)).collect();
    let mixed: Vec<u32> = (0..4096).map(|_| rng.random_range(0u32..=0x10FFFF)).collect();

    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(4096));
    group.bench_function("ascii", |bench| {
        bench.iter(|| ascii.iter().map(|&b| trie.get_ascii(black_box(b))).sum::<u32>())
    });
    group.bench_function("bmp", |bench| {
        bench.iter(|| bmp.iter().map(|&cp| trie.get(black_box(cp))).sum::<u32>())
    });
    group.bench_function("mixed_planes", |bench| {
        bench.iter(|| mixed.iter().map(|&cp| trie.get(black_box(cp))).sum::<u32>())
    });
    group.finish();
}

fn bench_run_enumeration(c: &mut Criterion) {
    let trie = property_table_builder(13, 1024)
        .freeze(ValueWidth::Bits32)
        .unwrap();
    c.bench_function("enumerate_runs", |bench| {
        bench.iter(|| {
            let mut cp = 0u32;
            let mut runs = 0u32;
            loop {
                let run = trie.get_range(cp).unwrap();
                runs += 1;
                if run.end == 0x10FFFF {
                    break;
                }
                cp = run.end + 1;
            }
            black_box(runs)
        })
    });
}

criterion_group!(benches, bench_build_freeze, bench_lookup, bench_run_enumeration);
criterion_main!(benches);
