use std::sync::Arc;
use blob_storage::backends::entity::EntityBackend;
use blob_storage::backends::memory::MemoryBackend;
use blob_storage::{Backend, BackendPolicy, ContentHash, StorageRouter, StorageUsage};
use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::tempdir;
use tokio::runtime::Runtime;

const CHUNK: usize = 64 * 1024;
const CHUNKS: usize = 16;

async fn upload(router: &StorageRouter, hash: &ContentHash, chunk: &[u8]) {
    router.init_upload(hash, (CHUNK * CHUNKS) as u64, "bench.bin", "application/octet-stream").await.unwrap();
    for _ in 0..CHUNKS {
        router.add_chunk(hash, chunk).await.unwrap();
    }
    router.finalize_upload(hash).await.unwrap();
}

fn chunked_upload_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let temp_dir = tempdir().unwrap();
    let chunk = vec![0x5a; CHUNK];
    let hash = ContentHash::parse("0123456789abcdef0123456789abcdef").unwrap();

    let entity: Arc<dyn Backend> = Arc::new(EntityBackend::open(temp_dir.path(), BackendPolicy::default()).unwrap());
    let db_router = StorageRouter::new(vec![entity], StorageUsage::Asset);
    c.bench_function("db upload 1 MiB in 64 KiB chunks", |b| {
        b.iter(|| runtime.block_on(upload(&db_router, &hash, &chunk)))
    });

    let memory: Arc<dyn Backend> = Arc::new(MemoryBackend::default());
    let fan_out = StorageRouter::new(
        vec![memory, Arc::new(MemoryBackend::default())],
        StorageUsage::Asset,
    );
    c.bench_function("memory x2 upload 1 MiB in 64 KiB chunks", |b| {
        b.iter(|| runtime.block_on(upload(&fan_out, &hash, &chunk)))
    });
}

criterion_group!(benches, chunked_upload_benchmark);
criterion_main!(benches);
