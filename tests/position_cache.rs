//! Position cache behavior: round-trips, counters, persistence across instances.

use meshnotes::gateway::position_cache::PositionCache;
use meshnotes::storage::Store;

#[test]
fn update_then_get_returns_latest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let mut cache = PositionCache::new(store);

    cache.update("node1", 4.6097, -74.0817);
    let pos = cache.get("node1").expect("position");
    assert_eq!(pos.lat, 4.6097);
    assert_eq!(pos.lon, -74.0817);
    assert_eq!(pos.seen_count, 1);
    assert!(cache.age_secs("node1").unwrap() < 1);
}

#[test]
fn seen_count_increments_per_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let mut cache = PositionCache::new(store);

    for i in 1..=4u64 {
        cache.update("node1", 4.0 + i as f64, -74.0);
        assert_eq!(cache.get("node1").unwrap().seen_count, i);
    }
}

#[test]
fn positions_survive_into_a_second_cache_instance() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        let mut cache = PositionCache::new(store);
        cache.update("node1", 4.6097, -74.0817);
        cache.update("node2", 6.2442, -75.5812);
        // First instance never calls get() again.
    }

    let store = Store::open(dir.path()).unwrap();
    let mut cache = PositionCache::new(store);
    let pos = cache.get("node1").expect("persisted position");
    assert_eq!(pos.lat, 4.6097);
    assert_eq!(pos.lon, -74.0817);
    assert_eq!(cache.get("node2").unwrap().lat, 6.2442);
}

#[test]
fn clear_only_empties_memory() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let mut cache = PositionCache::new(store);

    cache.update("node1", 4.6097, -74.0817);
    cache.clear();
    // Lazily reloaded from the durable layer.
    assert_eq!(cache.get("node1").unwrap().lat, 4.6097);
}

#[test]
fn startup_purges_stale_durable_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let old = chrono::Utc::now() - chrono::Duration::seconds(100_000);
    store.save_position("ancient", 4.0, -74.0, old, 7).unwrap();
    store
        .save_position("recent", 4.1, -74.1, chrono::Utc::now(), 1)
        .unwrap();

    let mut cache = PositionCache::new(store.clone());
    // The stale row was loaded into memory but purged from the store; after a
    // clear it is gone for good.
    cache.clear();
    assert!(cache.get("ancient").is_none());
    assert!(cache.get("recent").is_some());
}
