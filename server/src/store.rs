/*
 * Created on Sat Jul 10 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
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

//! The delta store: composes the KV backend and the index manager into
//! append/lookup/filtered-scan operations. See spec §4.4.

use crate::delta::{Delta, DeltaId, ObjectId};
use crate::error::{EngineResult, Error};
use crate::index::IndexManager;
use crate::kv::{BatchOp, KvBackend};
use std::collections::HashSet;
use std::sync::Arc;

pub fn delta_key(id: &str) -> Vec<u8> {
    format!("d|{id}").into_bytes()
}

const PREFIX_DELTA: &[u8] = b"d|";
const PREFIX_CTX: &[u8] = b"ix:ctx|";

#[derive(Debug, Clone, Default)]
pub struct DeltaFilter {
    pub authors: Option<Vec<String>>,
    pub target_ids: Option<Vec<ObjectId>>,
    pub target_contexts: Option<Vec<String>>,
    pub time_range: Option<(i64, i64)>,
    pub include_negated: bool,
    pub limit: Option<usize>,
}

impl DeltaFilter {
    /// True iff `delta` would be selected by this filter's dimensions,
    /// liveness aside. Used by the subscription bus (spec §4.7), which
    /// shares this filter shape minus `limit`.
    pub fn matches(&self, delta: &Delta) -> bool {
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &delta.author) {
                return false;
            }
        }
        if let Some(target_ids) = &self.target_ids {
            let hits = delta
                .pointers
                .iter()
                .filter_map(|p| p.target.object_id())
                .any(|oid| target_ids.iter().any(|t| t == oid));
            if !hits {
                return false;
            }
        }
        if let Some(contexts) = &self.target_contexts {
            let hits = delta.pointers.iter().any(|p| {
                matches!(&p.target, crate::delta::Target::Object { context: Some(c), .. } if contexts.contains(c))
            });
            if !hits {
                return false;
            }
        }
        if let Some((lo, hi)) = self.time_range {
            if delta.timestamp < lo || delta.timestamp > hi {
                return false;
            }
        }
        true
    }
}

pub struct DeltaStore {
    kv: Arc<dyn KvBackend>,
    index: IndexManager,
}

impl DeltaStore {
    pub fn new(kv: Arc<dyn KvBackend>, enable_indexing: bool) -> Self {
        Self {
            index: IndexManager::new(kv.clone(), enable_indexing),
            kv,
        }
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    /// Persist `delta` via a single atomic batch: `d|id` plus all index
    /// entries. Re-appending an already-stored delta is a no-op (content
    /// addressing makes this safe) and returns `false`.
    pub fn append(&self, delta: &Delta) -> EngineResult<bool> {
        if self.kv.get(&delta_key(&delta.id))?.is_some() {
            return Ok(false);
        }
        let encoded = serde_json::to_vec(delta)
            .map_err(|e| Error::invalid_delta(format!("failed to encode delta: {e}")))?;
        let mut ops = vec![BatchOp::Put(delta_key(&delta.id), encoded)];
        ops.extend(self.index.entries_for(delta));
        self.kv.batch(ops)?;
        Ok(true)
    }

    /// Persist every delta in `deltas` as a single atomic KV batch (spec
    /// §4.7's `persistDeltas`): either all of the new records and their
    /// index entries land, or none do. Deltas already present are skipped
    /// (same content-addressing idempotence as [`Self::append`]); the
    /// returned `Vec<bool>` marks which entries were newly written, in the
    /// order given.
    pub fn append_batch(&self, deltas: &[Delta]) -> EngineResult<Vec<bool>> {
        let mut ops = Vec::new();
        let mut newly_written = Vec::with_capacity(deltas.len());
        for delta in deltas {
            if self.kv.get(&delta_key(&delta.id))?.is_some() {
                newly_written.push(false);
                continue;
            }
            let encoded = serde_json::to_vec(delta)
                .map_err(|e| Error::invalid_delta(format!("failed to encode delta: {e}")))?;
            ops.push(BatchOp::Put(delta_key(&delta.id), encoded));
            ops.extend(self.index.entries_for(delta));
            newly_written.push(true);
        }
        if !ops.is_empty() {
            self.kv.batch(ops)?;
        }
        Ok(newly_written)
    }

    fn load(&self, id: &str) -> EngineResult<Option<Delta>> {
        match self.kv.get(&delta_key(id))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::backend_io(format!("corrupt delta record `{id}`: {e}"))),
        }
    }

    /// Fetch by id, preserving request order; missing ids are omitted.
    pub fn get(&self, ids: &[DeltaId]) -> EngineResult<Vec<Delta>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(d) = self.load(id)? {
                out.push(d);
            }
        }
        Ok(out)
    }

    fn all_delta_ids(&self) -> EngineResult<Vec<DeltaId>> {
        Ok(self
            .kv
            .range_scan(PREFIX_DELTA)?
            .into_iter()
            .map(|(k, _)| String::from_utf8_lossy(&k[PREFIX_DELTA.len()..]).into_owned())
            .collect())
    }

    /// Every delta id whose pointer set includes an object target carrying
    /// one of `contexts`, independent of which object it names. There is no
    /// dedicated keyspace for this (spec §4.2 indexes context per-object),
    /// so this dimension is answered with one scan over `ix:ctx|` — or, when
    /// indexing is disabled (spec §6), a full scan over `d|` filtered the
    /// same way `IndexManager::by_target_context`'s fallback is.
    fn by_any_target_context(&self, contexts: &[String]) -> EngineResult<HashSet<DeltaId>> {
        if !self.index.indexing_enabled() {
            return Ok(self
                .index
                .full_scan()?
                .into_iter()
                .filter(|d| {
                    d.pointers.iter().any(|p| {
                        matches!(&p.target, crate::delta::Target::Object { context: Some(c), .. }
                            if contexts.contains(c))
                    })
                })
                .map(|d| d.id)
                .collect());
        }
        let rows = self.kv.range_scan(PREFIX_CTX)?;
        let mut out = HashSet::new();
        for (k, _) in rows {
            let rest = String::from_utf8_lossy(&k[PREFIX_CTX.len()..]).into_owned();
            // ix:ctx|<objectId>|<context>|<deltaId>
            let mut parts = rest.splitn(3, '|');
            let (Some(_object_id), Some(context), Some(delta_id)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if contexts.iter().any(|c| c == context) {
                out.insert(delta_id.to_string());
            }
        }
        Ok(out)
    }

    /// The intersection of every non-empty filter dimension (spec §4.4).
    /// Default behavior excludes non-live deltas; `include_negated: true`
    /// overrides. Results are ordered ascending `(timestamp, id)`.
    pub fn query(&self, filter: &DeltaFilter) -> EngineResult<Vec<Delta>> {
        let mut candidates: Option<HashSet<DeltaId>> = None;

        let mut intersect = |set: HashSet<DeltaId>, candidates: &mut Option<HashSet<DeltaId>>| {
            *candidates = Some(match candidates.take() {
                None => set,
                Some(existing) => existing.intersection(&set).cloned().collect(),
            });
        };

        if let Some(authors) = &filter.authors {
            let mut set = HashSet::new();
            for a in authors {
                set.extend(self.index.by_author(a)?);
            }
            intersect(set, &mut candidates);
        }
        if let Some(target_ids) = &filter.target_ids {
            let mut set = HashSet::new();
            for t in target_ids {
                set.extend(self.index.by_target(t)?);
            }
            intersect(set, &mut candidates);
        }
        if let Some(contexts) = &filter.target_contexts {
            let set = self.by_any_target_context(contexts)?;
            intersect(set, &mut candidates);
        }
        if let Some((lo, hi)) = filter.time_range {
            let set: HashSet<DeltaId> = self.index.by_time_range(lo, hi)?.into_iter().collect();
            intersect(set, &mut candidates);
        }

        let ids: Vec<DeltaId> = match candidates {
            Some(set) => set.into_iter().collect(),
            None => self.all_delta_ids()?,
        };

        let mut deltas = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(delta) = self.load(&id)? else {
                continue;
            };
            if !filter.include_negated && !self.index.is_live(&id)? {
                continue;
            }
            deltas.push(delta);
        }

        deltas.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        if let Some(limit) = filter.limit {
            deltas.truncate(limit);
        }
        Ok(deltas)
    }
}
