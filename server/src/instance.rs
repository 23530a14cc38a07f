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

//! The embeddable instance façade: wires the delta store, index, cache, bus
//! and schema registry together behind the operations spec §4 describes.

use crate::bus::{Backpressure, SubscriptionBus, SubscriptionOptions, Subscriber};
use crate::cache::{CacheStats, HyperViewCache};
use crate::config::{BackpressurePolicy, Config, StorageKind};
use crate::delta::{Delta, DeltaId, ObjectId, Pointer, ROLE_REASON};
use crate::error::{EngineResult, Error};
use crate::index::IndexManager;
use crate::kv::log::LogBackend;
use crate::kv::memory::MemoryBackend;
use crate::kv::KvBackend;
use crate::schema::materializer::{materialize, materialize_at};
use crate::schema::{HyperSchema, SchemaRegistry};
use crate::store::{DeltaFilter, DeltaStore};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const KEY_SYSTEM_ID: &[u8] = b"meta:system_id";

fn resolve_system_id(kv: &dyn KvBackend, config: &Config) -> EngineResult<String> {
    if let Some(id) = &config.system_id {
        return Ok(id.clone());
    }
    if let Some(stored) = kv.get(KEY_SYSTEM_ID)? {
        return Ok(String::from_utf8_lossy(&stored).into_owned());
    }
    let generated = uuid::Uuid::new_v4().to_string();
    kv.put(KEY_SYSTEM_ID, generated.as_bytes())?;
    Ok(generated)
}

fn map_backpressure(policy: BackpressurePolicy) -> Backpressure {
    match policy {
        BackpressurePolicy::DropNewest => Backpressure::DropNewest,
        BackpressurePolicy::DropOldest => Backpressure::DropOldest,
        BackpressurePolicy::BlockProducer => Backpressure::BlockProducer,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceStats {
    pub cache: CacheStatsSnapshot,
    pub subscriber_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl From<CacheStats> for CacheStatsSnapshot {
    fn from(s: CacheStats) -> Self {
        Self {
            hits: s.hits,
            misses: s.misses,
            evictions: s.evictions,
            invalidations: s.invalidations,
        }
    }
}

/// One embeddable HyperDB instance. Multiple instances may coexist in the
/// same process (spec §9) — each carries its own `systemId`, storage, cache
/// and schema registry; nothing here is a process-wide global.
pub struct Instance {
    system_id: String,
    config: Config,
    store: DeltaStore,
    cache: HyperViewCache,
    bus: SubscriptionBus,
    schemas: SchemaRegistry,
    closed: AtomicBool,
}

impl Instance {
    pub fn open(config: Config) -> EngineResult<Self> {
        let kv: Arc<dyn KvBackend> = match config.storage {
            StorageKind::Memory => Arc::new(MemoryBackend::new()),
            StorageKind::Persistent => {
                let path = config
                    .path
                    .as_ref()
                    .ok_or_else(|| Error::invalid_delta("persistent storage requires `path` to be set"))?;
                Arc::new(LogBackend::open(path)?)
            }
        };
        let system_id = resolve_system_id(kv.as_ref(), &config)?;
        log::info!("hyperdb instance {system_id} opened ({:?} storage)", config.storage);
        Ok(Self {
            store: DeltaStore::new(kv, config.enable_indexing),
            cache: HyperViewCache::new(config.cache_size),
            bus: SubscriptionBus::new(),
            schemas: SchemaRegistry::new(),
            system_id,
            config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::closed());
        }
        Ok(())
    }

    /// Build (but do not persist) a delta authored by this instance, stamped
    /// with its `systemId`. Pass `timestamp` to control it explicitly (tests,
    /// replays); otherwise the current wall-clock time is used.
    pub fn create_delta(
        &self,
        author: impl Into<String>,
        timestamp: Option<i64>,
        pointers: Vec<Pointer>,
    ) -> EngineResult<Delta> {
        self.check_open()?;
        let ts = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Delta::create(author, self.system_id.clone(), ts, pointers)
    }

    /// Persist one delta; invalidates the cache and notifies subscribers iff
    /// it was newly written (re-persisting an existing delta is a no-op).
    pub async fn persist_delta(&self, delta: Delta) -> EngineResult<bool> {
        Ok(self.persist_deltas(vec![delta]).await?.into_iter().next().unwrap_or(false))
    }

    /// Persist every delta in `deltas` as one atomic batch (spec §4.7), then
    /// invalidate affected cache entries and fan out newly written deltas to
    /// subscribers in the order given.
    pub async fn persist_deltas(&self, deltas: Vec<Delta>) -> EngineResult<Vec<bool>> {
        self.check_open()?;
        let written = self.store.append_batch(&deltas)?;
        for (delta, was_written) in deltas.iter().zip(written.iter()) {
            if !*was_written {
                continue;
            }
            for object_id in IndexManager::referenced_objects(delta) {
                self.cache.invalidate_object(&object_id);
            }
            self.bus.publish(delta).await;
        }
        Ok(written)
    }

    /// Record a negation of `target_id`, optionally carrying a `reason`
    /// pointer (spec §4.1).
    pub async fn negate(
        &self,
        author: impl Into<String>,
        target_id: &str,
        reason: Option<String>,
    ) -> EngineResult<Delta> {
        self.check_open()?;
        let mut pointers = vec![Pointer::new(
            crate::delta::ROLE_NEGATES,
            crate::delta::Target::object(target_id),
        )];
        if let Some(reason) = reason {
            pointers.push(Pointer::new(ROLE_REASON, crate::delta::Target::str(reason)));
        }
        let delta = self.create_delta(author, None, pointers)?;
        self.persist_delta(delta.clone()).await?;
        Ok(delta)
    }

    pub fn get_deltas(&self, ids: &[DeltaId]) -> EngineResult<Vec<Delta>> {
        self.check_open()?;
        self.store.get(ids)
    }

    pub fn query_deltas(&self, filter: &DeltaFilter) -> EngineResult<Vec<Delta>> {
        self.check_open()?;
        self.store.query(filter)
    }

    pub fn register_schema(&self, schema: HyperSchema) -> EngineResult<()> {
        self.check_open()?;
        self.schemas.register(schema);
        Ok(())
    }

    pub fn unregister_schema(&self, schema_id: &str) -> EngineResult<()> {
        self.check_open()?;
        self.schemas.unregister(schema_id);
        Ok(())
    }

    /// Materialize `object_id` under `schema_id`, serving from cache when
    /// possible (spec §4.6). `depth` bounds nested/recursive schema
    /// expansion (spec §4.5): `0` leaves every nested attribute as a
    /// `{_ref}` stub.
    pub fn materialize(&self, object_id: &ObjectId, schema_id: &str, depth: usize) -> EngineResult<Value> {
        self.check_open()?;
        if let Some(view) = self.cache.get(object_id, schema_id, depth, None) {
            return Ok(view);
        }
        let view = materialize(&self.store, &self.schemas, object_id, schema_id, depth)?;
        self.cache.put(object_id, schema_id, depth, None, view.clone());
        Ok(view)
    }

    /// Time-travel materialization (spec §4.5): also cached, keyed by `at`.
    pub fn materialize_at(
        &self,
        object_id: &ObjectId,
        schema_id: &str,
        at: i64,
        depth: usize,
    ) -> EngineResult<Value> {
        self.check_open()?;
        if let Some(view) = self.cache.get(object_id, schema_id, depth, Some(at)) {
            return Ok(view);
        }
        let view = materialize_at(&self.store, &self.schemas, object_id, schema_id, at, depth)?;
        self.cache.put(object_id, schema_id, depth, Some(at), view.clone());
        Ok(view)
    }

    /// Subscribe to live deltas matching `filter`; defaults for queue
    /// capacity and backpressure come from this instance's [`Config`] unless
    /// overridden.
    pub fn subscribe(
        &self,
        filter: DeltaFilter,
        capacity: Option<usize>,
        backpressure: Option<BackpressurePolicy>,
    ) -> EngineResult<Subscriber> {
        self.check_open()?;
        Ok(self.bus.subscribe(SubscriptionOptions {
            filter,
            capacity: capacity.unwrap_or(self.config.subscription_queue_size),
            backpressure: map_backpressure(backpressure.unwrap_or(self.config.backpressure_policy)),
        }))
    }

    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        self.bus.unsubscribe(subscriber.id());
    }

    pub fn get_stats(&self) -> InstanceStats {
        InstanceStats {
            cache: self.cache.stats().into(),
            subscriber_count: self.bus.subscriber_count(),
        }
    }

    /// Close the instance: ends every live subscription and rejects further
    /// operations with [`crate::error::ErrorKind::Closed`]. Idempotent.
    pub fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.bus.close();
        self.cache.clear();
        log::info!("hyperdb instance {} closed", self.system_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Target;
    use crate::schema::predicate::{PrimitiveKind, SelectPredicate, WhenPredicate};
    use crate::schema::AttributeRule;

    fn instance() -> Instance {
        Instance::open(Config::memory()).unwrap()
    }

    #[tokio::test]
    async fn persist_then_materialize_round_trip() {
        let inst = instance();
        inst.register_schema(
            HyperSchema::new("person", "Person", SelectPredicate::TargetContextEquals)
                .with_attribute(
                    "name",
                    AttributeRule::primitive(PrimitiveKind::String, WhenPredicate::PrimitiveIs(PrimitiveKind::String)),
                ),
        )
        .unwrap();

        let d = inst
            .create_delta(
                "alice",
                Some(100),
                vec![
                    Pointer::new("subject", Target::object_ctx("p1", "name")),
                    Pointer::new("value", Target::str("Alice")),
                ],
            )
            .unwrap();
        assert!(inst.persist_delta(d).await.unwrap());

        let view = inst.materialize(&"p1".to_string(), "person", 0).unwrap();
        assert_eq!(view["name"], Value::String("Alice".to_string()));
    }

    #[tokio::test]
    async fn negate_flips_liveness_and_is_queryable() {
        let inst = instance();
        let d = inst
            .create_delta("a", Some(1), vec![Pointer::new("x", Target::int(1))])
            .unwrap();
        inst.persist_delta(d.clone()).await.unwrap();
        inst.negate("a", &d.id, Some("duplicate entry".into())).await.unwrap();

        let got = inst.get_deltas(&[d.id.clone()]).unwrap();
        assert_eq!(got.len(), 1);
        let filter = DeltaFilter {
            target_ids: None,
            ..Default::default()
        };
        let live = inst.query_deltas(&filter).unwrap();
        assert!(!live.iter().any(|x| x.id == d.id));
    }

    #[tokio::test]
    async fn subscriber_receives_newly_persisted_deltas() {
        let inst = instance();
        let sub = inst.subscribe(DeltaFilter::default(), None, None).unwrap();
        let d = inst
            .create_delta("a", Some(1), vec![Pointer::new("x", Target::int(1))])
            .unwrap();
        inst.persist_delta(d.clone()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().id, d.id);
    }

    #[tokio::test]
    async fn closed_instance_rejects_operations() {
        let inst = instance();
        inst.close().unwrap();
        assert!(inst.create_delta("a", Some(1), vec![Pointer::new("x", Target::int(1))]).is_err());
    }

    #[tokio::test]
    async fn system_id_is_stable_for_persistent_storage_across_reopen() {
        let mut path = std::env::temp_dir();
        path.push(format!("hyperdb-instance-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let id_first = {
            let inst = Instance::open(Config::persistent(path.to_str().unwrap())).unwrap();
            inst.system_id().to_string()
        };
        let id_second = {
            let inst = Instance::open(Config::persistent(path.to_str().unwrap())).unwrap();
            inst.system_id().to_string()
        };
        assert_eq!(id_first, id_second);
        let _ = std::fs::remove_file(&path);
    }
}
