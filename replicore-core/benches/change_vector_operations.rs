use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use replicore_core::core_replication::hashing::xxhash64;
use replicore_core::core_replication::{
    ChangeVector, ConflictSet, IncomingReplicationProcessor, RawChangeVectorEntry, ResolutionPolicy, Timestamp,
    VersionedItem,
};
use replicore_core::test_utils::fixtures::node;
use uuid::Uuid;

fn wide_vector(nodes: usize, offset: i64) -> ChangeVector {
    let raw = (0..nodes).map(|i| {
        let id = Uuid::from_u128(i as u128 + 1);
        RawChangeVectorEntry::new(id, (i as i64 % 7) + offset)
    });
    ChangeVector::try_from_entries(raw).unwrap()
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_vector_compare");

    for size in [4, 32, 256].iter() {
        let a = wide_vector(*size, 1);
        let b = wide_vector(*size, 1).increment(Uuid::from_u128(1)).unwrap();
        let disjoint = wide_vector(*size, 2).increment(Uuid::from_u128(u128::MAX)).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("dominated", size), size, |bench, _| {
            bench.iter(|| black_box(a.compare(&b)));
        });
        group.bench_with_input(BenchmarkId::new("concurrent", size), size, |bench, _| {
            bench.iter(|| black_box(b.compare(&disjoint)));
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_vector_merge");

    for size in [4, 32, 256].iter() {
        let a = wide_vector(*size, 1);
        let b = wide_vector(*size / 2 + 1, 3);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("pairwise", size), size, |bench, _| {
            bench.iter(|| black_box(a.merge(&b)));
        });
    }

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for size in [64usize, 1_024, 16_384].iter() {
        let data = vec![0xABu8; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("xxhash64", size), &data, |bench, data| {
            bench.iter(|| black_box(xxhash64(data, 0)));
        });
    }

    let members: Vec<VersionedItem> = (1..=8u8)
        .map(|n| {
            let raw = vec![RawChangeVectorEntry::new(node(n), 1)];
            let cv = ChangeVector::try_from_entries(raw).unwrap();
            VersionedItem::document("d", "Users", vec![n; 128], cv, Timestamp(n as u64))
        })
        .collect();
    let set = ConflictSet::from_members("d", members).unwrap();
    group.bench_function("conflict_set_8", |bench| {
        bench.iter(|| black_box(set.fingerprint()));
    });

    group.finish();
}

fn bench_process_conflicts(c: &mut Criterion) {
    let mut group = c.benchmark_group("processor");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for sources in [2u8, 8].iter() {
        group.throughput(Throughput::Elements(*sources as u64));
        group.bench_with_input(BenchmarkId::new("resolve_to_latest", sources), sources, |bench, &n| {
            bench.to_async(&runtime).iter(|| async move {
                let processor = IncomingReplicationProcessor::builder(node(200))
                    .policy(ResolutionPolicy::ResolveToLatest)
                    .build();
                for source in 1..=n {
                    let cv = ChangeVector::try_from_entries(vec![RawChangeVectorEntry::new(node(source), 1)]).unwrap();
                    let item = VersionedItem::document("d", "Users", vec![source], cv, Timestamp(source as u64));
                    processor.process_item(item, node(source)).await.unwrap();
                }
                black_box(processor)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compare, bench_merge, bench_fingerprint, bench_process_conflicts);
criterion_main!(benches);
