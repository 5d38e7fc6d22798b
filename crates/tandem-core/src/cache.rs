//! Read-through cache of secondary-store entities.
//!
//! The cache is owned by whoever constructs it and handed to the components
//! that read or write through it. Entries expire after a TTL and the oldest
//! insertion is evicted when the cache is full. The replay engine
//! invalidates every key it writes once the enclosing diff file commits.

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::observe;
use crate::types::{EntityKey, EntityPayload};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A cached lookup result; absence is cached too.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntity {
    Present(EntityPayload),
    Absent,
}

impl CachedEntity {
    pub fn into_option(self) -> Option<EntityPayload> {
        match self {
            CachedEntity::Present(payload) => Some(payload),
            CachedEntity::Absent => None,
        }
    }
}

impl From<Option<EntityPayload>> for CachedEntity {
    fn from(value: Option<EntityPayload>) -> Self {
        match value {
            Some(payload) => CachedEntity::Present(payload),
            None => CachedEntity::Absent,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedEntity,
    inserted_at: DateTime<Utc>,
    /// Matches the queue slot that owns this entry.
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        (now - self.inserted_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

/// Insertion order. A slot is live only while the entry under its key still
/// carries the slot's sequence number.
#[derive(Default)]
struct Fifo {
    slots: VecDeque<(EntityKey, u64)>,
    next_seq: u64,
}

pub struct EntityCache {
    entries: DashMap<EntityKey, CacheEntry>,
    fifo: Mutex<Fifo>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    ttl: Duration,
    enabled: bool,
}

impl EntityCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries),
            fifo: Mutex::new(Fifo::default()),
            clock: Arc::new(SystemClock),
            capacity: config.max_entries,
            ttl: config.ttl(),
            enabled: config.enabled && config.max_entries > 0,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(&CacheConfig::disabled())
    }

    /// Measure entry age with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn get(&self, key: &EntityKey) -> Option<CachedEntity> {
        if !self.enabled {
            return None;
        }
        let Some(entry) = self.entries.get(key) else {
            observe::record_cache_lookup(false);
            return None;
        };
        if entry.is_expired(self.clock.now(), self.ttl) {
            let seq = entry.seq;
            drop(entry);
            self.entries.remove_if(key, |_, e| e.seq == seq);
            observe::record_cache_lookup(false);
            return None;
        }
        let value = entry.value.clone();
        drop(entry);
        observe::record_cache_lookup(true);
        Some(value)
    }

    pub fn insert(&self, key: EntityKey, value: CachedEntity) {
        if !self.enabled {
            return;
        }
        let mut fifo = self.fifo.lock();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one(&mut fifo);
        }
        let seq = fifo.next_seq;
        fifo.next_seq += 1;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: self.clock.now(),
                seq,
            },
        );
        fifo.slots.push_back((key, seq));
        if fifo.slots.len() > self.capacity.saturating_mul(2) {
            self.compact(&mut fifo);
        }
    }

    /// Return the cached value or load, cache and return it.
    pub fn get_or_load<F>(&self, key: &EntityKey, load: F) -> Result<Option<EntityPayload>>
    where
        F: FnOnce(&EntityKey) -> Result<Option<EntityPayload>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit.into_option());
        }
        let loaded = load(key)?;
        self.insert(key.clone(), CachedEntity::from(loaded.clone()));
        Ok(loaded)
    }

    pub fn invalidate<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a EntityKey>,
    {
        if !self.enabled {
            return;
        }
        for key in keys {
            self.entries.remove(key);
        }
    }

    pub fn clear(&self) {
        let mut fifo = self.fifo.lock();
        self.entries.clear();
        fifo.slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            enabled: self.enabled,
        }
    }

    fn is_live(&self, key: &EntityKey, seq: u64) -> bool {
        self.entries.get(key).is_some_and(|e| e.seq == seq)
    }

    /// Remove the oldest live entry, dropping stale slots on the way.
    fn evict_one(&self, fifo: &mut Fifo) {
        while let Some((key, seq)) = fifo.slots.pop_front() {
            if self.entries.remove_if(&key, |_, e| e.seq == seq).is_some() {
                break;
            }
        }
    }

    fn compact(&self, fifo: &mut Fifo) {
        fifo.slots.retain(|(key, seq)| self.is_live(key, *seq));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::types::EntityKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn key(id: &str) -> EntityKey {
        EntityKey::new(EntityKind::DomainBase, id)
    }

    fn payload(n: i64) -> EntityPayload {
        EntityPayload::v1(json!({ "n": n }))
    }

    #[test]
    fn caches_presence_and_absence() {
        let cache = EntityCache::new(&CacheConfig::default());
        assert!(cache.get(&key("a")).is_none());

        cache.insert(key("a"), CachedEntity::Present(payload(1)));
        cache.insert(key("b"), CachedEntity::Absent);
        assert_eq!(cache.get(&key("a")), Some(CachedEntity::Present(payload(1))));
        assert_eq!(cache.get(&key("b")), Some(CachedEntity::Absent));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let cache = EntityCache::new(&CacheConfig::default().with_max_entries(2));
        cache.insert(key("a"), CachedEntity::Absent);
        cache.insert(key("b"), CachedEntity::Absent);
        cache.insert(key("c"), CachedEntity::Absent);

        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("b")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn entries_expire() {
        let clock = Arc::new(FakeClock::new(Utc.timestamp_millis_opt(1_000).unwrap()));
        let cache = EntityCache::new(&CacheConfig::default().with_ttl(Duration::from_millis(10)))
            .with_clock(clock.clone());
        cache.insert(key("a"), CachedEntity::Absent);

        clock.advance_by(chrono::Duration::milliseconds(10));
        assert!(cache.get(&key("a")).is_some());
        clock.advance_one_milli();
        assert!(cache.get(&key("a")).is_none());
    }

    #[test]
    fn reinserted_key_is_not_evicted_before_older_entries() {
        let cache = EntityCache::new(&CacheConfig::default().with_max_entries(2));
        cache.insert(key("a"), CachedEntity::Absent);
        cache.insert(key("b"), CachedEntity::Absent);
        cache.invalidate([&key("a")]);
        cache.insert(key("a"), CachedEntity::Absent);
        cache.insert(key("c"), CachedEntity::Absent);

        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn queue_stays_bounded_under_churn() {
        let cache = EntityCache::new(&CacheConfig::default().with_max_entries(10));
        for _ in 0..100_000 {
            cache.insert(key("hot"), CachedEntity::Absent);
            cache.invalidate([&key("hot")]);
        }
        for i in 0..1_000 {
            cache.insert(key("warm"), CachedEntity::Present(payload(i)));
        }
        assert_eq!(cache.stats().size, 1);
        assert!(cache.fifo.lock().slots.len() <= 21);
        assert_eq!(cache.get(&key("warm")), Some(CachedEntity::Present(payload(999))));
    }

    #[test]
    fn get_or_load_loads_once() {
        let cache = EntityCache::new(&CacheConfig::default());
        let mut loads = 0;
        for _ in 0..3 {
            let value = cache
                .get_or_load(&key("a"), |_| {
                    loads += 1;
                    Ok(Some(payload(7)))
                })
                .unwrap();
            assert_eq!(value, Some(payload(7)));
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn invalidate_and_disabled() {
        let cache = EntityCache::new(&CacheConfig::default());
        cache.insert(key("a"), CachedEntity::Absent);
        cache.invalidate([&key("a")]);
        assert!(cache.get(&key("a")).is_none());

        let off = EntityCache::disabled();
        off.insert(key("a"), CachedEntity::Absent);
        assert!(off.get(&key("a")).is_none());
        assert!(!off.stats().enabled);
    }
}
