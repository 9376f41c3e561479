//! Writer path benchmarks.
//!
//! Run with: `cargo bench --bench writer_paths`
//!
//! Covers the per-chunk write path against the in-memory store, temporary
//! name derivation, commit planning and state (de)serialization.

use blobsink::{
    BlobIdentifier, BlobNaming, CommitState, InMemoryBlobStorage, RecoverableWriter, ResumeState,
    ResumeStateSerializer, StateSerializer, WriterOptions,
};
use blobsink::writer::plan_commit;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use uuid::Uuid;

fn final_blob() -> BlobIdentifier {
    BlobIdentifier::new("bench-bucket", "dir/part-00000").unwrap()
}

fn bench_stream_write(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("stream_write");

    for chunk_size in [4 * 1024, 64 * 1024] {
        let total = 1024 * 1024;
        let payload = vec![0x5au8; 4096];
        group.throughput(Throughput::Bytes(total as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    runtime.block_on(async {
                        let storage = Arc::new(InMemoryBlobStorage::new());
                        let writer = RecoverableWriter::new(
                            storage,
                            WriterOptions::default().with_chunk_size(chunk_size),
                        )
                        .unwrap();
                        let mut stream = writer.open("gs://bench-bucket/out").unwrap();
                        for _ in 0..total / payload.len() {
                            stream.write(black_box(&payload)).await.unwrap();
                        }
                        stream.close_for_commit().await.unwrap().commit().await.unwrap();
                    })
                })
            },
        );
    }

    group.finish();
}

fn bench_temporary_names(c: &mut Criterion) {
    let mut group = c.benchmark_group("temporary_blob");
    group.throughput(Throughput::Elements(1));
    let blob = final_blob();
    let id = Uuid::new_v4();

    for (name, naming) in [
        ("plain", BlobNaming::default()),
        ("entropy", BlobNaming::new(None, true)),
        ("scratch", BlobNaming::new(Some("scratch".into()), false)),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| naming.temporary_blob(black_box(&blob), black_box(id)))
        });
    }

    group.finish();
}

fn bench_plan_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_commit");
    let naming = BlobNaming::default();

    for n in [32usize, 1025, 10_000] {
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        let state = CommitState::new(final_blob(), ids);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &state, |b, state| {
            b.iter(|| plan_commit(black_box(state), &naming, 32))
        });
    }

    group.finish();
}

fn bench_resume_state_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("resume_state_codec");
    let serializer = ResumeStateSerializer;

    for n in [1usize, 100, 10_000] {
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        let state = ResumeState::new(final_blob(), ids, n as u64 * 8 * 1024 * 1024, false);
        let bytes = serializer.serialize(&state);
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("serialize", n), &state, |b, state| {
            b.iter(|| serializer.serialize(black_box(state)))
        });
        group.bench_with_input(BenchmarkId::new("deserialize", n), &bytes, |b, bytes| {
            b.iter(|| serializer.deserialize(black_box(bytes)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_stream_write,
    bench_temporary_names,
    bench_plan_commit,
    bench_resume_state_codec,
);

criterion_main!(benches);
