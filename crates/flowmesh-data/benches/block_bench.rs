use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use flowmesh_core::BlockPool;
use flowmesh_data::{BlockFile, BlockWriter, DiscardSink};
use std::sync::Arc;

const ITEMS: u64 = 100_000;

fn bench_writer_fixed(c: &mut Criterion) {
    let pool = BlockPool::new();
    let mut group = c.benchmark_group("writer");
    group.throughput(Throughput::Elements(ITEMS));

    group.bench_function("append_u64", |b| {
        b.iter(|| {
            let sink = Arc::new(DiscardSink::new());
            let mut writer = BlockWriter::new(sink, pool.clone(), 64 * 1024).unwrap();
            for i in 0..ITEMS {
                writer.put_item(&i).unwrap();
            }
            writer.close().unwrap();
        })
    });

    group.bench_function("append_string", |b| {
        let values: Vec<String> = (0..ITEMS).map(|i| format!("value-{i}")).collect();
        b.iter(|| {
            let sink = Arc::new(DiscardSink::new());
            let mut writer = BlockWriter::new(sink, pool.clone(), 64 * 1024).unwrap();
            for value in &values {
                writer.put_item(value).unwrap();
            }
            writer.close().unwrap();
        })
    });

    group.finish();
}

fn bench_reader_fixed(c: &mut Criterion) {
    let pool = BlockPool::new();
    let file = BlockFile::new();
    let mut writer = file.writer(pool, 64 * 1024).unwrap();
    for i in 0..ITEMS {
        writer.put_item(&i).unwrap();
    }
    writer.close().unwrap();

    let mut group = c.benchmark_group("reader");
    group.throughput(Throughput::Elements(ITEMS));
    group.bench_function("decode_u64", |b| {
        b.iter(|| {
            let mut reader = file.reader();
            let mut sum = 0u64;
            while reader.has_next().unwrap() {
                sum = sum.wrapping_add(reader.next::<u64>().unwrap());
            }
            sum
        })
    });
    group.finish();
}

criterion_group!(benches, bench_writer_fixed, bench_reader_fixed);
criterion_main!(benches);
