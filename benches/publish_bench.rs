use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use streamlet::chunk::Chunk;
use streamlet::compression::Compression;
use streamlet::filter::{FilterIndex, Predicate};
use streamlet::message::Message;
use streamlet::producer::{FilterTagger, KeyExpression, PartitionRouter};
use streamlet::config::FilterConflictPolicy;
use streamlet::types::{BatchId, FilterValue};

fn messages(count: usize, payload_len: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            Message::builder()
                .payload(vec![0xABu8; payload_len])
                .attribute("order-id", format!("o-{i}"))
                .attribute("region", ["eu", "us", "apac"][i % 3])
                .build()
        })
        .collect()
}

fn bench_chunk_build(c: &mut Criterion) {
    let tagger = FilterTagger::new(
        KeyExpression::parse("attributes['region']").unwrap(),
        FilterConflictPolicy::Wildcard,
    );
    let mut group = c.benchmark_group("chunk_build");
    for &count in &[10usize, 100, 1_000] {
        let batch = messages(count, 256);
        group.throughput(Throughput::Elements(count as u64));
        for compression in [
            Compression::None,
            Compression::Gzip,
            Compression::Lz4,
            Compression::Snappy,
        ] {
            group.bench_with_input(
                BenchmarkId::new(format!("{compression:?}"), count),
                &batch,
                |b, batch| {
                    b.iter(|| {
                        let tag = tagger.tag(BatchId::new(1), batch).unwrap();
                        Chunk::build(batch, tag.value, tag.index, tag.unfiltered, compression)
                            .unwrap()
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_chunk_open(c: &mut Criterion) {
    let tagger = FilterTagger::new(
        KeyExpression::parse("attributes['region']").unwrap(),
        FilterConflictPolicy::Wildcard,
    );
    let batch = messages(100, 256);
    let mut group = c.benchmark_group("chunk_open");
    group.throughput(Throughput::Elements(100));
    for compression in [Compression::None, Compression::Lz4] {
        let tag = tagger.tag(BatchId::new(1), &batch).unwrap();
        let chunk =
            Chunk::build(&batch, tag.value, tag.index, tag.unfiltered, compression).unwrap();
        group.bench_function(format!("{compression:?}"), |b| {
            b.iter(|| chunk.open().unwrap())
        });
    }
    group.finish();
}

fn bench_routing(c: &mut Criterion) {
    let router = PartitionRouter::new(
        KeyExpression::parse("attributes['order-id']").unwrap(),
        32,
        false,
    );
    let batch = messages(1_000, 64);
    let mut group = c.benchmark_group("routing");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("route_1k", |b| {
        b.iter(|| {
            for msg in &batch {
                router.route(msg).unwrap();
            }
        })
    });
    group.finish();
}

fn bench_filter_index(c: &mut Criterion) {
    let mut index = FilterIndex::empty();
    for region in ["eu", "us", "apac"] {
        index.insert(&FilterValue::new(region));
    }
    let probe = FilterValue::new("latam");
    c.bench_function("filter_index_probe", |b| {
        b.iter(|| index.may_contain(&probe))
    });
}

fn bench_predicate(c: &mut Criterion) {
    let predicate =
        Predicate::parse(Some("region = 'eu' AND (kind = 'order' OR kind IN ('refund', 'cancel'))"))
            .unwrap();
    let attributes: HashMap<String, String> = [
        ("region".to_string(), "eu".to_string()),
        ("kind".to_string(), "refund".to_string()),
    ]
    .into();
    c.bench_function("predicate_eval", |b| {
        b.iter(|| predicate.matches(&attributes))
    });
}

criterion_group!(
    benches,
    bench_chunk_build,
    bench_chunk_open,
    bench_routing,
    bench_filter_index,
    bench_predicate
);
criterion_main!(benches);
