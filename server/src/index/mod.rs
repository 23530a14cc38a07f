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

//! Inverted indexes over deltas, and negation-parity liveness. See spec §4.3.
//!
//! Simplified from `engine::idx`'s lock-free, multi-threaded `mtchm`/`stord`
//! structures down to plain KV range scans: this engine is single-threaded
//! cooperative (spec §5), so there is no concurrent-writer problem to solve
//! here, only a keyspace layout one — see spec §4.2 for the `ix:*` prefixes.

use crate::delta::{Delta, DeltaId, ObjectId, Target};
use crate::error::{EngineResult, Error};
use crate::kv::{BatchOp, KvBackend};
use std::collections::{HashMap, HashSet};

const PREFIX_DELTA: &[u8] = b"d|";

/// Bias a signed millisecond timestamp into an unsigned range that sorts
/// identically to the signed value, then render as 16 lowercase hex chars.
/// This is what spec §4.2's "big-endian hex of the timestamp" needs to mean
/// to hold across the negative/positive boundary (pre-1970 timestamps).
fn time_hex(ts: i64) -> String {
    let biased = (ts as u64) ^ 0x8000_0000_0000_0000;
    format!("{:016x}", biased)
}

fn time_from_hex(hex: &str) -> Option<i64> {
    let biased = u64::from_str_radix(hex, 16).ok()?;
    Some((biased ^ 0x8000_0000_0000_0000) as i64)
}

fn key_target(object_id: &str, delta_id: &str) -> Vec<u8> {
    format!("ix:target|{object_id}|{delta_id}").into_bytes()
}
fn prefix_target(object_id: &str) -> Vec<u8> {
    format!("ix:target|{object_id}|").into_bytes()
}
fn key_ctx(object_id: &str, context: &str, delta_id: &str) -> Vec<u8> {
    format!("ix:ctx|{object_id}|{context}|{delta_id}").into_bytes()
}
fn prefix_ctx(object_id: &str, context: &str) -> Vec<u8> {
    format!("ix:ctx|{object_id}|{context}|").into_bytes()
}
fn key_author(author: &str, delta_id: &str) -> Vec<u8> {
    format!("ix:author|{author}|{delta_id}").into_bytes()
}
fn prefix_author(author: &str) -> Vec<u8> {
    format!("ix:author|{author}|").into_bytes()
}
fn key_time(ts: i64, delta_id: &str) -> Vec<u8> {
    format!("ix:time|{}|{delta_id}", time_hex(ts)).into_bytes()
}
const PREFIX_TIME: &[u8] = b"ix:time|";
fn key_neg(negated: &str, negator: &str) -> Vec<u8> {
    format!("ix:neg|{negated}|{negator}").into_bytes()
}
fn prefix_neg(negated: &str) -> Vec<u8> {
    format!("ix:neg|{negated}|").into_bytes()
}

fn suffix_after_prefix(key: &[u8], prefix_len: usize) -> String {
    String::from_utf8_lossy(&key[prefix_len..]).into_owned()
}

pub struct IndexManager {
    kv: std::sync::Arc<dyn KvBackend>,
    /// When false, only `ix:time` is maintained; target/context/author
    /// queries fall back to a full scan over `d|` (see spec §6).
    enable_indexing: bool,
}

impl IndexManager {
    pub fn new(kv: std::sync::Arc<dyn KvBackend>, enable_indexing: bool) -> Self {
        Self { kv, enable_indexing }
    }

    /// Pure: the set of index writes this delta contributes, to be folded
    /// into the caller's single atomic batch alongside the `d|id` write.
    pub fn entries_for(&self, delta: &Delta) -> Vec<BatchOp> {
        let mut ops = Vec::new();
        if self.enable_indexing {
            for p in &delta.pointers {
                if let Target::Object { id, context } = &p.target {
                    ops.push(BatchOp::Put(key_target(id, &delta.id), Vec::new()));
                    if let Some(ctx) = context {
                        ops.push(BatchOp::Put(key_ctx(id, ctx, &delta.id), Vec::new()));
                    }
                }
            }
            ops.push(BatchOp::Put(
                key_author(&delta.author, &delta.id),
                Vec::new(),
            ));
            if let Some(negated) = delta.negates() {
                ops.push(BatchOp::Put(key_neg(negated, &delta.id), Vec::new()));
            }
        }
        // ix:time is maintained unconditionally (spec §6)
        ops.push(BatchOp::Put(key_time(delta.timestamp, &delta.id), Vec::new()));
        ops
    }

    /// The reverse of `entries_for`, used only by compaction tooling — never
    /// called during normal append-only operation (spec §4.3).
    pub fn deindex_entries(&self, delta: &Delta) -> Vec<BatchOp> {
        let mut ops = Vec::new();
        if self.enable_indexing {
            for p in &delta.pointers {
                if let Target::Object { id, context } = &p.target {
                    ops.push(BatchOp::Delete(key_target(id, &delta.id)));
                    if let Some(ctx) = context {
                        ops.push(BatchOp::Delete(key_ctx(id, ctx, &delta.id)));
                    }
                }
            }
            ops.push(BatchOp::Delete(key_author(&delta.author, &delta.id)));
            if let Some(negated) = delta.negates() {
                ops.push(BatchOp::Delete(key_neg(negated, &delta.id)));
            }
        }
        ops.push(BatchOp::Delete(key_time(delta.timestamp, &delta.id)));
        ops
    }

    /// Every persisted delta, decoded. Only used as the `enableIndexing:
    /// false` fallback (spec §6): target/context/author queries degrade to
    /// this full scan, filtered in memory, instead of a range scan over a
    /// keyspace that was never written.
    pub(crate) fn full_scan(&self) -> EngineResult<Vec<Delta>> {
        let rows = self.kv.range_scan(PREFIX_DELTA)?;
        let mut out = Vec::with_capacity(rows.len());
        for (_, v) in rows {
            let delta: Delta = serde_json::from_slice(&v)
                .map_err(|e| Error::backend_io(format!("corrupt delta record: {e}")))?;
            out.push(delta);
        }
        Ok(out)
    }

    pub fn by_target(&self, object_id: &str) -> EngineResult<HashSet<DeltaId>> {
        if !self.enable_indexing {
            return Ok(self
                .full_scan()?
                .into_iter()
                .filter(|d| d.pointers.iter().any(|p| p.target.object_id() == Some(object_id)))
                .map(|d| d.id)
                .collect());
        }
        let prefix = prefix_target(object_id);
        let rows = self.kv.range_scan(&prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, _)| suffix_after_prefix(&k, prefix.len()))
            .collect())
    }

    pub fn by_target_context(&self, object_id: &str, context: &str) -> EngineResult<HashSet<DeltaId>> {
        if !self.enable_indexing {
            return Ok(self
                .full_scan()?
                .into_iter()
                .filter(|d| {
                    d.pointers.iter().any(|p| {
                        matches!(&p.target, Target::Object { id, context: Some(c) }
                            if id == object_id && c == context)
                    })
                })
                .map(|d| d.id)
                .collect());
        }
        let prefix = prefix_ctx(object_id, context);
        let rows = self.kv.range_scan(&prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, _)| suffix_after_prefix(&k, prefix.len()))
            .collect())
    }

    pub fn by_author(&self, author: &str) -> EngineResult<HashSet<DeltaId>> {
        if !self.enable_indexing {
            return Ok(self
                .full_scan()?
                .into_iter()
                .filter(|d| d.author == author)
                .map(|d| d.id)
                .collect());
        }
        let prefix = prefix_author(author);
        let rows = self.kv.range_scan(&prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, _)| suffix_after_prefix(&k, prefix.len()))
            .collect())
    }

    /// Whether this index is maintaining target/context/author keyspaces, or
    /// only `ix:time` — callers with their own dimension (e.g.
    /// [`crate::store::DeltaStore::by_any_target_context`]) need this to
    /// know when to fall back to [`Self::full_scan`] themselves.
    pub fn indexing_enabled(&self) -> bool {
        self.enable_indexing
    }

    /// Ascending `(timestamp, id)` order, inclusive of `lo` and `hi`.
    pub fn by_time_range(&self, lo: i64, hi: i64) -> EngineResult<Vec<DeltaId>> {
        let rows = self.kv.range_scan(PREFIX_TIME)?;
        let mut out = Vec::new();
        for (k, _) in rows {
            let rest = suffix_after_prefix(&k, PREFIX_TIME.len());
            let Some((ts_hex, delta_id)) = rest.split_once('|') else {
                continue;
            };
            let Some(ts) = time_from_hex(ts_hex) else {
                continue;
            };
            if ts >= lo && ts <= hi {
                out.push(delta_id.to_string());
            }
        }
        Ok(out)
    }

    pub fn negators_of(&self, delta_id: &str) -> EngineResult<HashSet<DeltaId>> {
        let prefix = prefix_neg(delta_id);
        let rows = self.kv.range_scan(&prefix)?;
        Ok(rows
            .into_iter()
            .map(|(k, _)| suffix_after_prefix(&k, prefix.len()))
            .collect())
    }

    /// A delta is live iff the count of its live negators is even (spec §3,
    /// §4.3). The negator graph is a DAG (a delta's id is fixed by its
    /// content before any negator targeting it can exist), so this
    /// recursion always terminates; memoized per top-level call to avoid
    /// re-walking shared sub-chains.
    pub fn is_live(&self, delta_id: &str) -> EngineResult<bool> {
        let mut memo = HashMap::new();
        self.is_live_memo(delta_id, &mut memo)
    }

    fn is_live_memo(&self, delta_id: &str, memo: &mut HashMap<DeltaId, bool>) -> EngineResult<bool> {
        if let Some(live) = memo.get(delta_id) {
            return Ok(*live);
        }
        let negators = self.negators_of(delta_id)?;
        let mut live_negators = 0usize;
        for n in &negators {
            if self.is_live_memo(n, memo)? {
                live_negators += 1;
            }
        }
        let live = live_negators % 2 == 0;
        memo.insert(delta_id.to_string(), live);
        Ok(live)
    }

    /// Same as `is_live`, but only negations with `timestamp <= at` count,
    /// for time-travel materialization (spec §4.5). `deltas_by_id` resolves
    /// a negator's timestamp.
    pub fn is_live_at(
        &self,
        delta_id: &str,
        at: i64,
        delta_timestamp: impl Fn(&str) -> EngineResult<Option<i64>> + Copy,
    ) -> EngineResult<bool> {
        let mut memo = HashMap::new();
        self.is_live_at_memo(delta_id, at, delta_timestamp, &mut memo)
    }

    fn is_live_at_memo(
        &self,
        delta_id: &str,
        at: i64,
        delta_timestamp: impl Fn(&str) -> EngineResult<Option<i64>> + Copy,
        memo: &mut HashMap<DeltaId, bool>,
    ) -> EngineResult<bool> {
        if let Some(live) = memo.get(delta_id) {
            return Ok(*live);
        }
        let negators = self.negators_of(delta_id)?;
        let mut live_negators = 0usize;
        for n in &negators {
            let Some(ts) = delta_timestamp(n)? else {
                continue;
            };
            if ts > at {
                continue;
            }
            if self.is_live_at_memo(n, at, delta_timestamp, memo)? {
                live_negators += 1;
            }
        }
        let live = live_negators % 2 == 0;
        memo.insert(delta_id.to_string(), live);
        Ok(live)
    }

    /// Every object id any pointer of `delta` references — used by the
    /// HyperView cache to know what to invalidate (spec §4.6).
    pub fn referenced_objects(delta: &Delta) -> HashSet<ObjectId> {
        delta
            .pointers
            .iter()
            .filter_map(|p| p.target.object_id().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{Delta, Pointer, Target};
    use crate::kv::memory::MemoryBackend;
    use std::sync::Arc;

    fn idx() -> IndexManager {
        IndexManager::new(Arc::new(MemoryBackend::new()), true)
    }

    fn put_delta(im: &IndexManager, d: &Delta) {
        im.kv.batch(im.entries_for(d)).unwrap();
    }

    /// Also writes the `d|id` body, needed for the `full_scan` fallback that
    /// `enableIndexing: false` relies on — the index-only `put_delta` above
    /// has nothing for a full scan to find.
    fn put_delta_with_body(im: &IndexManager, d: &Delta) {
        let mut ops = im.entries_for(d);
        ops.push(BatchOp::Put(
            format!("d|{}", d.id).into_bytes(),
            serde_json::to_vec(d).unwrap(),
        ));
        im.kv.batch(ops).unwrap();
    }

    #[test]
    fn time_hex_preserves_order_across_sign_boundary() {
        let mut ts = vec![-1000i64, -1, 0, 1, 1000, i64::MIN, i64::MAX];
        let hexed: Vec<String> = ts.iter().map(|t| time_hex(*t)).collect();
        let mut sorted_by_hex: Vec<(String, i64)> =
            hexed.into_iter().zip(ts.iter().cloned()).collect();
        sorted_by_hex.sort();
        ts.sort();
        let got: Vec<i64> = sorted_by_hex.into_iter().map(|(_, t)| t).collect();
        assert_eq!(got, ts);
    }

    #[test]
    fn disabled_indexing_falls_back_to_full_scan() {
        // spec §6: `enableIndexing: false` maintains only `ix:time`; target/
        // context/author queries must still answer correctly via a full scan.
        let im = IndexManager::new(Arc::new(MemoryBackend::new()), false);
        let d = Delta::create(
            "a",
            "s",
            10,
            vec![Pointer::new("named", Target::object_ctx("p1", "name"))],
        )
        .unwrap();
        put_delta_with_body(&im, &d);

        assert!(im.by_target("p1").unwrap().contains(&d.id));
        assert!(im.by_target_context("p1", "name").unwrap().contains(&d.id));
        assert!(im.by_author("a").unwrap().contains(&d.id));
        assert!(!im.by_target("p2").unwrap().contains(&d.id));
        assert!(!im.by_author("someone-else").unwrap().contains(&d.id));
    }

    #[test]
    fn index_completeness() {
        let im = idx();
        let d = Delta::create(
            "a",
            "s",
            10,
            vec![Pointer::new("named", Target::object_ctx("p1", "name"))],
        )
        .unwrap();
        put_delta(&im, &d);
        assert!(im.by_target("p1").unwrap().contains(&d.id));
        assert!(im.by_target_context("p1", "name").unwrap().contains(&d.id));
        assert!(im.by_author("a").unwrap().contains(&d.id));
    }

    #[test]
    fn negation_parity() {
        let im = idx();
        let base = Delta::create("a", "s", 10, vec![Pointer::new("x", Target::int(1))]).unwrap();
        put_delta(&im, &base);
        assert!(im.is_live(&base.id).unwrap());

        let neg1 = Delta::create(
            "a",
            "s",
            20,
            vec![Pointer::new("negates", Target::object(&base.id))],
        )
        .unwrap();
        put_delta(&im, &neg1);
        assert!(!im.is_live(&base.id).unwrap());

        let neg2 = Delta::create(
            "a",
            "s",
            30,
            vec![Pointer::new("negates", Target::object(&neg1.id))],
        )
        .unwrap();
        put_delta(&im, &neg2);
        assert!(im.is_live(&base.id).unwrap());
    }

    #[test]
    fn negation_parity_holds_over_random_negation_dags() {
        // spec §8: "verified by a random DAG of negations up to depth 5."
        // build a random chain of negators on top of a base delta and check
        // liveness always matches the parity of the chain length built so far.
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let im = idx();
            let base = Delta::create("a", "s", 0, vec![Pointer::new("x", Target::int(1))]).unwrap();
            put_delta(&im, &base);

            let depth = rng.gen_range(0..=5);
            let mut last_id = base.id.clone();
            for i in 1..=depth {
                let neg = Delta::create(
                    "a",
                    "s",
                    i as i64,
                    vec![Pointer::new("negates", Target::object(&last_id))],
                )
                .unwrap();
                put_delta(&im, &neg);
                last_id = neg.id.clone();
            }
            let expected_live = depth % 2 == 0;
            assert_eq!(im.is_live(&base.id).unwrap(), expected_live, "depth={depth}");
        }
    }

    #[test]
    fn time_range_scan_is_ascending_with_id_tiebreak() {
        let im = idx();
        let d1 = Delta::create("a", "s", 5, vec![Pointer::new("x", Target::int(1))]).unwrap();
        let d2 = Delta::create("a", "s", 5, vec![Pointer::new("x", Target::int(2))]).unwrap();
        let d3 = Delta::create("a", "s", 1, vec![Pointer::new("x", Target::int(3))]).unwrap();
        for d in [&d1, &d2, &d3] {
            put_delta(&im, d);
        }
        let got = im.by_time_range(i64::MIN, i64::MAX).unwrap();
        assert_eq!(got[0], d3.id);
        let mut tied = vec![d1.id.clone(), d2.id.clone()];
        tied.sort();
        assert_eq!(&got[1..], tied.as_slice());
    }
}
