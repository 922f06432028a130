use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use vmap_cache::{Cache, CacheConfig, ErrorKind, EvictionPolicy, Stat};

fn cache_with(size: u64, extent_size: u64) -> (Cache, tempfile::TempDir) {
    let mut config = CacheConfig::new();
    config.set_size(size).unwrap();
    config.set_extent_size(extent_size).unwrap();
    let cache = Cache::new(config);
    let dir = tempdir().unwrap();
    cache.attach(dir.path()).unwrap();
    (cache, dir)
}

#[test]
fn basic_put_get_roundtrip() {
    let (cache, _dir) = cache_with(1024 * 1024, 256);
    cache.put(b"alpha", b"first value").unwrap();
    cache.put(b"beta", b"second value").unwrap();

    let mut buf = [0u8; 11];
    let outcome = cache.get(b"alpha", Some(&mut buf), 0).unwrap();
    assert_eq!(outcome.copied, 11);
    assert_eq!(&buf, b"first value");

    assert!(cache.exists(b"beta"));
    assert!(!cache.exists(b"gamma"));
}

#[test]
fn offset_read_truncates_to_buffer_and_reports_total_size() {
    let (cache, _dir) = cache_with(1024 * 1024, 256);
    let value = b"0123456789abcdef";
    cache.put(b"k", value).unwrap();

    let mut buf = [0u8; 6];
    let outcome = cache.get(b"k", Some(&mut buf), 10).unwrap();
    assert_eq!(outcome.copied, 6);
    assert_eq!(&buf, b"abcdef");
    assert_eq!(outcome.total_size, value.len() as u64);

    // Offset past the end copies nothing but still reports total size.
    let mut buf = [0u8; 4];
    let outcome = cache.get(b"k", Some(&mut buf), 1000).unwrap();
    assert_eq!(outcome.copied, 0);
    assert_eq!(outcome.total_size, value.len() as u64);
}

#[test]
fn lru_eviction_order_is_respected() {
    let (cache, _dir) = cache_with(1024 * 1024, 256);
    cache.put(b"a", b"1").unwrap();
    cache.put(b"b", b"2").unwrap();
    cache.put(b"c", b"3").unwrap();

    // Touch "a" so "b" becomes the least-recently-used entry.
    cache.get(b"a", None, 0).unwrap();

    cache.evict(None).unwrap();
    assert!(!cache.exists(b"b"));
    assert!(cache.exists(b"a"));
    assert!(cache.exists(b"c"));
}

#[test]
fn no_eviction_policy_reports_no_space_instead_of_evicting() {
    let mut config = CacheConfig::new();
    config.set_size(1024 * 1024).unwrap();
    config.set_extent_size(256).unwrap();
    config.set_eviction_policy(EvictionPolicy::None);
    let cache = Cache::new(config);
    let dir = tempdir().unwrap();
    cache.attach(dir.path()).unwrap();

    let big = vec![0u8; 512 * 1024];
    cache.put(b"first", &big).unwrap();
    let err = cache.put(b"second", &big).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpace);
}

#[test]
fn two_level_demotion_via_on_evict_into_a_sibling_cache() {
    let (hot, _hot_dir) = cache_with(1024 * 1024, 256);
    let (cold, _cold_dir) = cache_with(4 * 1024 * 1024, 256);
    let cold = Arc::new(cold);

    let cold_for_callback = Arc::clone(&cold);
    let values: Arc<Mutex<std::collections::HashMap<Vec<u8>, Vec<u8>>>> =
        Arc::new(Mutex::new(std::collections::HashMap::new()));
    let values_for_put = Arc::clone(&values);
    let values_for_evict = Arc::clone(&values);

    hot.callback_on_evict(move |key| {
        if let Some(value) = values_for_evict.lock().unwrap().get(key) {
            let _ = cold_for_callback.put(key, value);
        }
    });

    for i in 0..800u32 {
        let key = i.to_be_bytes().to_vec();
        let value = vec![i as u8; 2048];
        values_for_put.lock().unwrap().insert(key.clone(), value.clone());
        // Eviction pressure on the small "hot" cache demotes older
        // entries into "cold" through the on_evict callback above.
        while hot.put(&key, &value).is_err() {
            hot.evict(None).unwrap();
        }
    }

    // Some early keys should have been demoted into the cold cache.
    let demoted = (0..10u32).any(|i| cold.exists(&i.to_be_bytes()));
    assert!(demoted, "expected at least one entry demoted into the cold cache");
}

#[test]
fn on_miss_put_satisfies_the_waiting_get_inline() {
    let (cache, _dir) = cache_with(1024 * 1024, 256);
    let cache = Arc::new(cache);
    let cache_for_callback = Arc::clone(&cache);

    cache.callback_on_miss(move |key| {
        let _ = cache_for_callback.put(key, b"loaded-on-demand");
    });

    let mut buf = [0u8; 16];
    let outcome = cache.get(b"lazy", Some(&mut buf), 0).unwrap();
    assert_eq!(outcome.copied, 16);
    assert_eq!(&buf, b"loaded-on-demand");

    // The value is now actually in the cache for subsequent lookups.
    assert!(cache.exists(b"lazy"));
}

#[test]
fn reentrant_get_from_within_own_on_miss_callback_reports_busy() {
    let (cache, _dir) = cache_with(1024 * 1024, 256);
    let cache = Arc::new(cache);
    let cache_for_callback = Arc::clone(&cache);

    cache.callback_on_miss(move |_key| {
        let result = cache_for_callback.get(b"other", None, 0);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Busy);
    });

    assert_eq!(cache.get(b"missing", None, 0).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn concurrent_puts_gets_and_evictions_preserve_integrity() {
    let _ = env_logger::try_init();

    let (cache, _dir) = cache_with(2 * 1024 * 1024, 256);
    let cache = Arc::new(cache);

    std::thread::scope(|scope| {
        for t in 0..6u32 {
            let cache = Arc::clone(&cache);
            scope.spawn(move || {
                use rand::Rng;
                let mut rng = rand::thread_rng();
                for i in 0..300u32 {
                    let key = (t * 10_000 + i).to_be_bytes();
                    let payload = vec![0u8; rng.gen_range(1..=64)];
                    let _ = cache.put(&key, &payload);
                    let _ = cache.get(&key, None, 0);
                    if i % 17 == 0 {
                        let _ = cache.evict(None);
                    }
                }
            });
        }
    });

    assert!(cache.get_stat(Stat::Puts) > 0);
}
