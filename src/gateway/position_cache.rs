//! Dual-layer GPS position cache.
//!
//! Holds the last-known position per mesh node in memory, persisted through the
//! sled store so positions survive restarts and power loss. Persistence failures
//! are logged and swallowed: the in-memory update stands, trading durability for
//! availability. Construction bulk-loads every stored row and runs the one-time
//! stale-position purge; nothing sweeps in the background after that.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info, warn};

use crate::storage::{Position, Store};

/// Positions older than this are purged at startup (24 hours).
pub const POSITION_MAX_AGE_SECS: u64 = 86_400;

pub struct PositionCache {
    positions: HashMap<String, Position>,
    store: Store,
}

impl PositionCache {
    /// Build the cache: load all persisted positions into memory, then purge
    /// durable rows older than [`POSITION_MAX_AGE_SECS`].
    pub fn new(store: Store) -> Self {
        let mut cache = Self {
            positions: HashMap::new(),
            store,
        };
        match cache.store.load_all_positions() {
            Ok(loaded) => {
                if !loaded.is_empty() {
                    info!("Loaded {} position(s) from store", loaded.len());
                }
                cache.positions = loaded;
            }
            Err(e) => warn!("Failed to load positions from store: {}", e),
        }
        match cache.store.cleanup_old_positions(POSITION_MAX_AGE_SECS) {
            Ok(0) => {}
            Ok(n) => info!("Purged {} stale position(s) from store", n),
            Err(e) => warn!("Stale position purge failed: {}", e),
        }
        cache
    }

    /// Record an observation for a node. The memory layer is updated first and
    /// always wins; persistence is synchronous but non-fatal.
    pub fn update(&mut self, node_id: &str, lat: f64, lon: f64) {
        let now = Utc::now();
        let seen_count = match self.positions.get_mut(node_id) {
            Some(pos) => {
                pos.lat = lat;
                pos.lon = lon;
                pos.received_at = now;
                pos.seen_count += 1;
                pos.seen_count
            }
            None => {
                self.positions.insert(
                    node_id.to_string(),
                    Position {
                        lat,
                        lon,
                        received_at: now,
                        seen_count: 1,
                    },
                );
                1
            }
        };

        if let Err(e) = self.store.save_position(node_id, lat, lon, now, seen_count) {
            warn!("Failed to persist position for {}: {}", node_id, e);
        }
        debug!("Updated position for {}: ({}, {})", node_id, lat, lon);
    }

    /// Last observation for a node, reading through to the store when the memory
    /// layer misses (and repopulating memory on a hit).
    pub fn get(&mut self, node_id: &str) -> Option<Position> {
        if let Some(pos) = self.positions.get(node_id) {
            return Some(pos.clone());
        }
        match self.store.get_position(node_id) {
            Ok(Some(pos)) => {
                self.positions.insert(node_id.to_string(), pos.clone());
                Some(pos)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Position read-through failed for {}: {}", node_id, e);
                None
            }
        }
    }

    /// Seconds since the last observation for a node.
    pub fn age_secs(&mut self, node_id: &str) -> Option<i64> {
        self.get(node_id)
            .map(|pos| (Utc::now() - pos.received_at).num_seconds())
    }

    /// Empty the memory layer only. Durable rows outlive a clear and are
    /// reloaded lazily on the next `get`.
    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache() -> (tempfile::TempDir, PositionCache) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("store");
        (dir, PositionCache::new(store))
    }

    #[test]
    fn update_then_get_roundtrips_and_counts() {
        let (_dir, mut cache) = temp_cache();
        cache.update("node1", 4.6097, -74.0817);
        cache.update("node1", 4.6100, -74.0820);
        let pos = cache.get("node1").expect("position");
        assert_eq!(pos.lat, 4.6100);
        assert_eq!(pos.lon, -74.0820);
        assert_eq!(pos.seen_count, 2);
        assert!(cache.age_secs("node1").unwrap() < 1);
    }

    #[test]
    fn clear_keeps_durable_rows() {
        let (_dir, mut cache) = temp_cache();
        cache.update("node1", 4.6097, -74.0817);
        cache.clear();
        let pos = cache.get("node1").expect("reloaded from store");
        assert_eq!(pos.lat, 4.6097);
        assert_eq!(pos.seen_count, 1);
    }

    #[test]
    fn absent_node_is_absent() {
        let (_dir, mut cache) = temp_cache();
        assert!(cache.get("ghost").is_none());
        assert!(cache.age_secs("ghost").is_none());
    }
}
