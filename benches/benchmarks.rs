//! Benchmarks for rdelta operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

use rdelta::{
    BlockOperation, BlockSize, ContentDigest, DeltaEncoder, Fingerprinter, LookupTable,
    PatchApplier, RollingChecksum, StrongHash,
};
use tokio_util::sync::CancellationToken;

const BLOCK: usize = 2048;

fn block_size() -> BlockSize {
    BlockSize::new(BLOCK).unwrap()
}

fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn table(basis: &[u8]) -> LookupTable {
    LookupTable::from_signatures(Fingerprinter::new(basis, block_size(), CancellationToken::new()))
        .unwrap()
}

fn encode(source: &[u8], table: &LookupTable) -> Vec<BlockOperation> {
    DeltaEncoder::new(
        source,
        table,
        block_size(),
        ContentDigest::new(),
        CancellationToken::new(),
    )
    .collect::<rdelta::Result<_>>()
    .unwrap()
}

fn bench_rolling_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("rolling_checksum");

    for size in [1024, 2048, 8192].iter() {
        let data = noise(*size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("new", size), &data, |b, data| {
            b.iter(|| RollingChecksum::new(black_box(data)));
        });
    }

    group.finish();
}

fn bench_rolling_checksum_roll(c: &mut Criterion) {
    let mut group = c.benchmark_group("rolling_checksum_roll");

    let data = noise(BLOCK);
    let mut checksum = RollingChecksum::new(&data);

    group.bench_function("roll", |b| {
        b.iter(|| {
            checksum.roll(black_box(42), black_box(43));
        });
    });

    group.finish();
}

fn bench_strong_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("strong_hash");

    for size in [1024, 2048, 8192, 65536].iter() {
        let data = noise(*size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("compute", size), &data, |b, data| {
            b.iter(|| StrongHash::compute(black_box(data)));
        });
    }

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for size in [10_240, 102_400, 1_024_000].iter() {
        let data = noise(*size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("generate", size), &data, |b, data| {
            b.iter(|| {
                Fingerprinter::new(black_box(&data[..]), block_size(), CancellationToken::new())
                    .count()
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [10_240, 102_400, 1_024_000].iter() {
        let basis = noise(*size);
        let table = table(&basis);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("identical", size), &basis, |b, source| {
            b.iter(|| encode(black_box(source), &table));
        });
    }

    // Worst case: every window misses.
    for size in [10_240, 102_400].iter() {
        let table = table(&vec![0u8; *size]);
        let source = noise(*size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("different", size), &source, |b, source| {
            b.iter(|| encode(black_box(source), &table));
        });
    }

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    for size in [10_240, 102_400, 1_024_000].iter() {
        let basis = noise(*size);
        let ops = encode(&basis, &table(&basis));

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("copies", size), &ops, |b, ops| {
            let mut output = Vec::with_capacity(*size);
            b.iter(|| {
                output.clear();
                let mut applier = PatchApplier::new(
                    Cursor::new(black_box(&basis)),
                    &mut output,
                    block_size(),
                    ContentDigest::new(),
                    CancellationToken::new(),
                )
                .unwrap();
                applier.apply(ops.iter().cloned().map(Ok)).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("roundtrip");

    for size in [10_240, 102_400].iter() {
        let basis = noise(*size);

        // Source with 10% modification
        let mut source = basis.clone();
        for i in (0..source.len()).step_by(10) {
            source[i] = 0xFF;
        }

        group.throughput(Throughput::Bytes(*size as u64 * 2)); // basis + source
        group.bench_with_input(
            BenchmarkId::new("10pct_change", size),
            &(&basis, &source),
            |b, (basis, source)| {
                b.iter(|| {
                    let ops = encode(black_box(source), &table(black_box(basis)));
                    let mut output = Vec::with_capacity(source.len());
                    PatchApplier::new(
                        Cursor::new(*basis),
                        &mut output,
                        block_size(),
                        ContentDigest::new(),
                        CancellationToken::new(),
                    )
                    .unwrap()
                    .apply(ops.into_iter().map(Ok))
                    .unwrap();
                    output
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_rolling_checksum,
    bench_rolling_checksum_roll,
    bench_strong_hash,
    bench_fingerprint,
    bench_encode,
    bench_apply,
    bench_roundtrip,
);

criterion_main!(benches);
