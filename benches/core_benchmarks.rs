use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::tempdir;
use vmap_cache::{Cache, CacheConfig};

fn attached_cache(size: u64) -> (Cache, tempfile::TempDir) {
    let mut config = CacheConfig::new();
    config.set_size(size).unwrap();
    let cache = Cache::new(config);
    let dir = tempdir().unwrap();
    cache.attach(dir.path()).unwrap();
    (cache, dir)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    const POOL_SIZE: u64 = 64 * 1024 * 1024;
    let mut group = c.benchmark_group("Cache Operations");

    {
        let (cache, _dir) = attached_cache(POOL_SIZE);
        for i in 0..1000u32 {
            cache.put(&i.to_be_bytes(), b"benchmark-value").unwrap();
        }

        group.bench_function("get hit", |b| {
            b.iter(|| {
                for i in 0..100u32 {
                    black_box(cache.get(&(i % 1000).to_be_bytes(), None, 0).unwrap());
                }
            });
        });

        group.bench_function("get miss", |b| {
            b.iter(|| {
                for i in 0..100u32 {
                    black_box(cache.get(&(i + 1000).to_be_bytes(), None, 0).ok());
                }
            });
        });
    }

    {
        let (cache, _dir) = attached_cache(POOL_SIZE);
        group.bench_function("put", |b| {
            let mut i = 0u32;
            b.iter(|| {
                let key = i.to_be_bytes();
                let _ = cache.put(&key, b"benchmark-value");
                i += 1;
            });
        });
    }

    {
        let (cache, _dir) = attached_cache(1024 * 1024);
        for i in 0..200u32 {
            let _ = cache.put(&i.to_be_bytes(), &[0u8; 1024]);
        }
        group.bench_function("put under eviction pressure", |b| {
            let mut i = 200u32;
            b.iter(|| {
                let key = i.to_be_bytes();
                let _ = cache.put(&key, &[0u8; 1024]);
                i += 1;
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
