/*
 * Created on Thu Jan 19 2023
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Bounded LRU cache of materialized HyperViews, coherently invalidated on
//! delta arrival. See spec §4.6.

use crate::delta::ObjectId;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    object_id: ObjectId,
    schema_id: String,
    /// nesting depth the view was materialized with (spec §4.6: the cache
    /// key is `(objectId, schemaId, depth, atTimestampOrNow)`), since a
    /// shallow and a deep view of the same object/schema are different
    /// values.
    depth: usize,
    /// `None` for the live view, `Some(t)` for a `materializeAt(t)` view —
    /// kept in the same cache since both invalidate identically on write.
    at: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// `cache_size: 0` (spec §6) disables the cache entirely: every `get` misses
/// and every `put`/`invalidate_object` is a no-op, so callers don't need a
/// separate disabled-cache code path.
pub struct HyperViewCache {
    inner: Option<Mutex<LruCache<CacheKey, Value>>>,
    stats: Mutex<CacheStats>,
}

impl HyperViewCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|n| Mutex::new(LruCache::new(n))),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn get(&self, object_id: &str, schema_id: &str, depth: usize, at: Option<i64>) -> Option<Value> {
        let inner = self.inner.as_ref()?;
        let key = CacheKey {
            object_id: object_id.to_string(),
            schema_id: schema_id.to_string(),
            depth,
            at,
        };
        let mut stats = self.stats.lock();
        let hit = inner.lock().get(&key).cloned();
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    pub fn put(&self, object_id: &str, schema_id: &str, depth: usize, at: Option<i64>, view: Value) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let key = CacheKey {
            object_id: object_id.to_string(),
            schema_id: schema_id.to_string(),
            depth,
            at,
        };
        if let Some((evicted_key, _)) = inner.lock().push(key, view) {
            if evicted_key.object_id != object_id || evicted_key.schema_id != schema_id {
                self.stats.lock().evictions += 1;
            }
        }
    }

    /// Drop every cached view (any schema, any depth, live or time-travel)
    /// of `object_id`. Called on every `append` for each object referenced
    /// by the new delta's pointers (spec §4.6, C6) — broader than strictly
    /// necessary (a delta about `p1.name` also invalidates `p1`'s cached
    /// views under unrelated schemas) but correct, and nested schemas mean a
    /// change to `p1` can affect any ancestor's cached view, not just `p1`'s
    /// own, so callers must also invalidate every object that transitively
    /// nests `p1` — tracked by the caller, not this cache.
    pub fn invalidate_object(&self, object_id: &str) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut inner = inner.lock();
        let stale: Vec<CacheKey> = inner
            .iter()
            .filter(|(k, _)| k.object_id == object_id)
            .map(|(k, _)| k.clone())
            .collect();
        let removed = stale.len();
        for key in stale {
            inner.pop(&key);
        }
        if removed > 0 {
            self.stats.lock().invalidations += removed as u64;
        }
    }

    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref() {
            inner.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}
